//! Accelerated execution core of the Nano virtual machine.
//!
//! This crate executes Nano intermediate code against a [`Memory`](nano_core::Memory).
//! Programs normally run on the accelerator, which rebuilds the code as a
//! graph of nodes specialized ahead of time:
//!
//! - **Scalar caches**: scalar int64/float64/bool cells mirrored by shared
//!   mutable values, so hot nodes never touch a container
//! - **Specialized units**: one node type per operator, element type, and
//!   operand shape, monomorphized over zero-sized operator types
//! - **Fusion**: dependent arithmetic pairs and runs of copies merged into
//!   single nodes
//! - **Bypass**: anything without a unit runs on the generic processor
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   VirtualMachine                     │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌───────────────┐  │
//! │  │ Accelerator                 │  │ Generic       │  │
//! │  │  DataManager → scheduler →  │  │ Processor     │  │
//! │  │  dispatch → NodeGraph       │─►│ (bypass,      │  │
//! │  │  trampoline: node.step()    │  │  fallback)    │  │
//! │  └─────────────────────────────┘  └───────────────┘  │
//! │                                                      │
//! │  ┌──────────────┐  ┌──────────────────────────────┐  │
//! │  │ Interconnect │  │ Monitor (Send + Sync)        │  │
//! │  │ (CALLX)      │  │ terminate, progress counters │  │
//! │  └──────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use nano_vm::{VirtualMachine, VmConfig, Interconnect};
//!
//! let vm = VirtualMachine::new(VmConfig::default());
//! let report = vm.execute(&instructions, &memory, &Interconnect::new())?;
//! let result = memory.result();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

// Core modules
pub mod config;
pub mod error;
pub mod monitor;
pub mod vm;

// Execution engines
pub mod accelerator;
pub mod processor;

// Host functions
pub mod interconnect;

// Re-exports
pub use accelerator::{AccelerationType, Accelerator, AcceleratorInstruction, NodeGraph};
pub use config::{AcceleratorConfig, DumpStream, DumpTarget, VmConfig};
pub use error::{ErrorClass, ErrorLocation, RuntimeError, RuntimeErrorKind, VmResult};
pub use interconnect::{ArgumentSlot, ExternalFunction, ExternalFunctionError, Interconnect};
pub use monitor::{Monitor, RunOutcome, RunReport};
pub use processor::{GenericProcessor, Processor};
pub use vm::VirtualMachine;
