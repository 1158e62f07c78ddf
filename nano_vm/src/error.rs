//! Runtime error types for the virtual machine.
//!
//! Errors fall into three classes (see [`ErrorClass`]):
//! - Fatal: dispatcher/scheduler mismatches, never the script author's fault
//! - Structured: language-level conditions reported to the script author
//! - Crash: anything else raised while running, wrapped by the driver

use crate::accelerator::AccelerationType;
use nano_core::{DataError, DataType, Opcode, SourceLocation};
use std::fmt;
use std::sync::Arc;

/// Runtime error during dispatch or execution.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// Error kind
    pub kind: RuntimeErrorKind,
    /// Instruction the error was raised at (if known)
    pub location: Option<ErrorLocation>,
}

/// Specific runtime error types.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    // =========================================================================
    // Structured Errors
    // =========================================================================
    /// Vector assigned into a scalar destination
    ArrayTooLargeForScalar { size: usize },
    /// Termination requested while the terminator is disabled
    TerminatorDisabled,
    /// Control reached the end of a function that must return a value
    FunctionEndedWithoutReturn { function: Arc<str> },
    /// Value could not be converted
    CastFailed { value: Arc<str>, target: DataType },

    // =========================================================================
    // Execution Faults
    // =========================================================================
    /// Memory or container failure
    Data(DataError),
    /// Integer division or remainder by zero
    DivisionByZero,
    /// Host function failed
    ExternalFunction { function: Arc<str>, message: Arc<str> },

    // =========================================================================
    // Fatal Errors
    // =========================================================================
    /// Opcode not handled by the unit selected for it
    InvalidOpcode { opcode: Opcode, unit: &'static str },
    /// Acceleration type with no unit
    UnsupportedAccelerationType { accel: AccelerationType },
    /// Wrong number of operands
    InvalidOperandCount {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
    /// Internal VM error (should not happen)
    Internal { message: Arc<str> },

    // =========================================================================
    // Wrappers
    // =========================================================================
    /// Node construction failed
    DispatchFailed { cause: Box<RuntimeErrorKind> },
    /// Unclassified failure while running
    UnexpectedCrash { cause: Box<RuntimeErrorKind> },
}

/// Classification of a [`RuntimeErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Scheduler/dispatcher mismatch.
    Fatal,
    /// Condition reported to the script author.
    Structured,
    /// Any other failure while running.
    Crash,
}

impl RuntimeErrorKind {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ArrayTooLargeForScalar { .. }
            | Self::TerminatorDisabled
            | Self::FunctionEndedWithoutReturn { .. }
            | Self::CastFailed { .. } => ErrorClass::Structured,
            Self::InvalidOpcode { .. }
            | Self::UnsupportedAccelerationType { .. }
            | Self::InvalidOperandCount { .. }
            | Self::Internal { .. }
            | Self::DispatchFailed { .. } => ErrorClass::Fatal,
            Self::Data(_)
            | Self::DivisionByZero
            | Self::ExternalFunction { .. }
            | Self::UnexpectedCrash { .. } => ErrorClass::Crash,
        }
    }
}

/// Instruction an error was raised at.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLocation {
    /// Address in the code as compiled
    pub address: usize,
    /// Address after scheduling
    pub reordered_address: usize,
    /// Rendered instruction
    pub instruction: Arc<str>,
    /// Script file and line
    pub source: Option<SourceLocation>,
}

impl RuntimeError {
    /// Create a new runtime error.
    #[inline]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// Attach the instruction location.
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: ErrorLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Classification of the kind.
    #[inline]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    // =========================================================================
    // Convenience Constructors
    // =========================================================================

    #[inline]
    pub fn array_too_large_for_scalar(size: usize) -> Self {
        Self::new(RuntimeErrorKind::ArrayTooLargeForScalar { size })
    }

    #[inline]
    pub fn terminator_disabled() -> Self {
        Self::new(RuntimeErrorKind::TerminatorDisabled)
    }

    #[inline]
    pub fn function_ended_without_return(function: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::FunctionEndedWithoutReturn {
            function: function.into(),
        })
    }

    #[inline]
    pub fn cast_failed(value: impl Into<Arc<str>>, target: DataType) -> Self {
        Self::new(RuntimeErrorKind::CastFailed {
            value: value.into(),
            target,
        })
    }

    #[inline]
    pub fn division_by_zero() -> Self {
        Self::new(RuntimeErrorKind::DivisionByZero)
    }

    #[inline]
    pub fn external(function: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::ExternalFunction {
            function: function.into(),
            message: message.into(),
        })
    }

    #[inline]
    pub fn invalid_opcode(opcode: Opcode, unit: &'static str) -> Self {
        Self::new(RuntimeErrorKind::InvalidOpcode { opcode, unit })
    }

    #[inline]
    pub fn unsupported_acceleration_type(accel: AccelerationType) -> Self {
        Self::new(RuntimeErrorKind::UnsupportedAccelerationType { accel })
    }

    #[inline]
    pub fn invalid_operand_count(opcode: Opcode, expected: usize, found: usize) -> Self {
        Self::new(RuntimeErrorKind::InvalidOperandCount {
            opcode,
            expected,
            found,
        })
    }

    #[inline]
    pub fn internal(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Wrap a node-construction failure.
    pub fn dispatch_failed(cause: RuntimeError, location: ErrorLocation) -> Self {
        Self::new(RuntimeErrorKind::DispatchFailed {
            cause: Box::new(cause.kind),
        })
        .with_location(location)
    }

    /// Enrich an error raised while executing the instruction at `location`.
    ///
    /// Structured errors keep their kind; everything else becomes an
    /// unexpected crash carrying the original kind as its cause.
    pub fn enrich(self, location: ErrorLocation) -> Self {
        let kind = match self.kind.class() {
            ErrorClass::Structured => self.kind,
            ErrorClass::Fatal | ErrorClass::Crash => match self.kind {
                crash @ RuntimeErrorKind::UnexpectedCrash { .. } => crash,
                other => RuntimeErrorKind::UnexpectedCrash {
                    cause: Box::new(other),
                },
            },
        };
        Self {
            kind,
            location: Some(self.location.unwrap_or(location)),
        }
    }
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArrayTooLargeForScalar { size } => write!(
                f,
                "ArrayTooLargeForScalar: an array of size {} cannot be assigned to a scalar",
                size
            ),
            Self::TerminatorDisabled => {
                write!(f, "TerminatorDisabled: the terminator is not enabled")
            }
            Self::FunctionEndedWithoutReturn { function } => write!(
                f,
                "FunctionEndedWithoutReturn: function '{}' ended without returning a value",
                function
            ),
            Self::CastFailed { value, target } => {
                write!(f, "CastFailed: cannot convert '{}' to {}", value, target)
            }
            Self::Data(err) => write!(f, "DataError: {}", err),
            Self::DivisionByZero => write!(f, "DivisionByZero: integer division by zero"),
            Self::ExternalFunction { function, message } => {
                write!(f, "ExternalFunctionError: '{}' failed: {}", function, message)
            }
            Self::InvalidOpcode { opcode, unit } => {
                write!(f, "InternalError: operation code {} is invalid for {}", opcode, unit)
            }
            Self::UnsupportedAccelerationType { accel } => {
                write!(f, "InternalError: unsupported acceleration type {}", accel)
            }
            Self::InvalidOperandCount {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "InternalError: {} takes {} operands, found {}",
                opcode, expected, found
            ),
            Self::Internal { message } => write!(f, "InternalError: {}", message),
            Self::DispatchFailed { cause } => write!(f, "DispatchFailed: {}", cause),
            Self::UnexpectedCrash { cause } => write!(f, "UnexpectedCrash: {}", cause),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(location) = &self.location {
            write!(
                f,
                " (address={}, reorderedAddress={}, instruction=[ {} ]",
                location.address, location.reordered_address, location.instruction
            )?;
            if let Some(source) = &location.source {
                write!(f, ", at {}", source)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<DataError> for RuntimeError {
    #[inline]
    fn from(err: DataError) -> Self {
        Self::new(RuntimeErrorKind::Data(err))
    }
}

/// Result type for VM operations.
pub type VmResult<T> = Result<T, RuntimeError>;
