//! Function control units.
//!
//! - [`internal`]: script function calls through the per-run call stacks
//! - [`external`]: host function calls through the interconnect

pub mod external;
pub mod internal;
