//! Host function table.
//!
//! Host (external) functions are registered on an [`Interconnect`] and
//! reached by `CALLX` through their index. A function always supports the
//! general container-based [`invoke`](ExternalFunction::invoke); it may also
//! declare, through [`accepts_cache`](ExternalFunction::accepts_cache), that
//! it can read and write the engine's scalar caches directly, which enables
//! the zero-copy call path.

use crate::accelerator::cache::ScalarCache;
use nano_core::{ContainerRef, DataContainer, DataType};
use std::rc::Rc;
use thiserror::Error;

/// Failure reported by a host function.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalFunctionError {
    /// The function ran and failed.
    #[error("{0}")]
    Failed(String),

    /// Cache-based invocation requested from a function that does not support it.
    #[error("cached invocation is not supported")]
    CachedInvocationUnsupported,
}

/// Slot of a host function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSlot {
    /// The return value.
    Return,
    /// The parameter at this position.
    Parameter(usize),
}

/// A host-native function callable from scripts.
pub trait ExternalFunction {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Per-parameter by-reference flags.
    fn parameter_references(&self) -> &[bool];

    /// Per-parameter const flags (const references do not disable caching).
    fn parameter_constants(&self) -> &[bool] {
        &[]
    }

    /// Type of the return value.
    fn return_type(&self) -> DataType;

    /// Rank of the return value; `None` when it depends on the arguments.
    fn return_rank(&self) -> Option<usize> {
        Some(0)
    }

    /// Whether arguments must go through data conversion before the call.
    fn is_data_conversion_necessary(&self) -> bool {
        true
    }

    /// Whether `slot` can take an engine cache of `data_type` directly.
    fn accepts_cache(&self, _slot: ArgumentSlot, _data_type: DataType) -> bool {
        false
    }

    /// Call with containers; the result is written into `result`.
    fn invoke(
        &self,
        arguments: &[ContainerRef],
        result: &DataContainer,
    ) -> Result<(), ExternalFunctionError>;

    /// Call with caches; `caches[0]` receives the result, `caches[1..]` are the arguments.
    fn invoke_cached(&self, _caches: &[ScalarCache]) -> Result<(), ExternalFunctionError> {
        Err(ExternalFunctionError::CachedInvocationUnsupported)
    }
}

/// Table of host functions.
#[derive(Default, Clone)]
pub struct Interconnect {
    functions: Vec<Rc<dyn ExternalFunction>>,
}

impl Interconnect {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function and return its index.
    pub fn register(&mut self, function: impl ExternalFunction + 'static) -> usize {
        self.functions.push(Rc::new(function));
        self.functions.len() - 1
    }

    /// Function at `index`.
    pub fn function(&self, index: usize) -> Option<&Rc<dyn ExternalFunction>> {
        self.functions.get(index)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for Interconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.functions.iter().map(|function| function.name().to_owned()))
            .finish()
    }
}
