//! Execution units.
//!
//! Each unit turns one scheduled instruction of its category into a node
//! specialized for the element type and operand shape picked by the
//! scheduler. Unit modules expose a `generate` function; the dispatcher
//! selects which one to call from the instruction's acceleration type.

use super::cache::{Cache, CachedElement};
use super::instruction::{AccelerationType, Category, ElementType, Shape};
use super::node::Execute;
use super::operand::OperandInfo;
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataError, DataResult, Opcode};

/// Node operation ready to be placed in the table.
pub type BoxedOp = Box<dyn Execute>;

/// Select a binary arithmetic operator type for `$opcode` and evaluate `$build` with it.
macro_rules! with_binary_op {
    ($opcode:expr, $unit:expr, |$op:ident| $build:expr) => {
        match $opcode {
            nano_core::Opcode::Add => {
                type $op = $crate::accelerator::units::ops::Add;
                $build
            }
            nano_core::Opcode::Sub => {
                type $op = $crate::accelerator::units::ops::Sub;
                $build
            }
            nano_core::Opcode::Mul => {
                type $op = $crate::accelerator::units::ops::Mul;
                $build
            }
            nano_core::Opcode::Div => {
                type $op = $crate::accelerator::units::ops::Div;
                $build
            }
            nano_core::Opcode::Rem => {
                type $op = $crate::accelerator::units::ops::Rem;
                $build
            }
            other => Err($crate::error::RuntimeError::invalid_opcode(other, $unit)),
        }
    };
}

/// Select a comparison operator type for `$opcode` and evaluate `$build` with it.
macro_rules! with_compare_op {
    ($opcode:expr, $unit:expr, |$op:ident| $build:expr) => {
        match $opcode {
            nano_core::Opcode::Eq => {
                type $op = $crate::accelerator::units::ops::Eq;
                $build
            }
            nano_core::Opcode::Neq => {
                type $op = $crate::accelerator::units::ops::Neq;
                $build
            }
            nano_core::Opcode::Gt => {
                type $op = $crate::accelerator::units::ops::Gt;
                $build
            }
            nano_core::Opcode::Lt => {
                type $op = $crate::accelerator::units::ops::Lt;
                $build
            }
            nano_core::Opcode::Geq => {
                type $op = $crate::accelerator::units::ops::Geq;
                $build
            }
            nano_core::Opcode::Leq => {
                type $op = $crate::accelerator::units::ops::Leq;
                $build
            }
            other => Err($crate::error::RuntimeError::invalid_opcode(other, $unit)),
        }
    };
}

pub mod allocation;
pub mod arithmetic;
pub mod branch;
pub mod bypass;
pub mod comparison;
pub mod logical;
pub mod nop;
pub mod ops;
pub mod subscript;
pub mod transfer;

/// Box a node operation.
#[inline]
pub(crate) fn boxed(op: impl Execute + 'static) -> VmResult<BoxedOp> {
    Ok(Box::new(op))
}

/// Exactly `N` operands, or an operand-count error.
pub(crate) fn fixed<'a, const N: usize>(
    opcode: Opcode,
    operands: &'a [OperandInfo],
) -> VmResult<&'a [OperandInfo; N]> {
    operands
        .try_into()
        .map_err(|_| RuntimeError::invalid_operand_count(opcode, N, operands.len()))
}

/// Error for a shape a unit has no node for.
pub(crate) fn unsupported(category: Category, element: ElementType, shape: Shape) -> RuntimeError {
    RuntimeError::unsupported_acceleration_type(AccelerationType::unit(category, element, shape))
}

/// Check two element counts agree.
#[inline]
pub(crate) fn ensure_size(expected: usize, found: usize) -> DataResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(DataError::SizeMismatch { expected, found })
    }
}

/// Scalar read and written either through a cache or through memory.
///
/// Lets a node be generic over where a scalar operand lives, so the choice
/// is made once at dispatch.
pub(crate) trait ScalarSlot<T: CachedElement>: 'static {
    fn load(&self) -> VmResult<T>;
    fn store(&self, value: T) -> VmResult<()>;
}

impl<T: CachedElement> ScalarSlot<T> for Cache<T> {
    #[inline(always)]
    fn load(&self) -> VmResult<T> {
        Ok(self.get())
    }

    #[inline(always)]
    fn store(&self, value: T) -> VmResult<()> {
        self.set(value);
        Ok(())
    }
}

impl<T: CachedElement> ScalarSlot<T> for ContainerRef {
    #[inline(always)]
    fn load(&self) -> VmResult<T> {
        Ok(self.get::<T>()?)
    }

    #[inline(always)]
    fn store(&self, value: T) -> VmResult<()> {
        Ok(self.set(value)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accelerator::cache::{CachedElement, ScalarCache};
    use crate::accelerator::context::ExecutionContext;
    use crate::accelerator::node::Flow;
    use crate::accelerator::operand::Operand;
    use crate::interconnect::Interconnect;
    use crate::processor::GenericProcessor;
    use nano_core::{DataContainer, Memory};

    /// Scalar operand with a cache holding `value`.
    pub(crate) fn cached_operand<T: CachedElement>(value: T, constant: bool) -> OperandInfo {
        let container = DataContainer::scalar(value).shared();
        let cache = ScalarCache::new(T::DATA_TYPE).unwrap();
        cache.to_cache(&container).unwrap();
        OperandInfo {
            handle: Operand::Cached(container, cache),
            scalar: true,
            constant,
        }
    }

    /// Operand accessed through memory only.
    pub(crate) fn memory_operand(container: DataContainer) -> OperandInfo {
        let scalar = container.is_scalar();
        OperandInfo {
            handle: Operand::Memory(container.shared()),
            scalar,
            constant: false,
        }
    }

    /// Execute `op` once against empty memory.
    pub(crate) fn run_op(op: &dyn Execute) -> VmResult<Flow> {
        let memory = Memory::new();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 4);
        op.execute(&mut ctx)
    }
}
