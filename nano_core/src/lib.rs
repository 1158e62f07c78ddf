//! # Nano Core
//!
//! Data model shared by the Nano virtual machine components.
//!
//! - **Containers**: typed, aliasable memory cells with shape information
//! - **Memory**: partitioned storage resolving operand references to containers
//! - **Instructions**: address-based intermediate code with source locations
//! - **Error Handling**: result types for memory and container failures

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod container;
pub mod data_type;
pub mod error;
pub mod instruction;
pub mod location;
pub mod memory;
pub mod opcode;

pub use container::{ArrayData, ContainerRef, DataContainer, Element, Lengths, View};
pub use data_type::DataType;
pub use error::{DataError, DataResult};
pub use instruction::{Instruction, OperandRef};
pub use location::SourceLocation;
pub use memory::{Memory, Partition};
pub use opcode::Opcode;

/// Nano runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
