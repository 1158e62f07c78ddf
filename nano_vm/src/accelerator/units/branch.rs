//! Branch unit: JMP and JMPN on a bool condition in operand 2.

use super::{BoxedOp, ScalarSlot, boxed, fixed, unsupported};
use crate::accelerator::cache::Cache;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, ElementType, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, Opcode};
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "branch unit";

/// Condition value every element must have for the jump to be taken.
trait Polarity: 'static {
    const JUMP_ON: bool;
}

struct IfTrue;
struct IfFalse;

impl Polarity for IfTrue {
    const JUMP_ON: bool = true;
}

impl Polarity for IfFalse {
    const JUMP_ON: bool = false;
}

/// Build the node for a JMP or JMPN.
pub fn generate(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    match instruction.opcode() {
        Opcode::Jmp => typed::<IfTrue>(Opcode::Jmp, shape, operands),
        Opcode::Jmpn => typed::<IfFalse>(Opcode::Jmpn, shape, operands),
        other => Err(RuntimeError::invalid_opcode(other, UNIT)),
    }
}

fn typed<P: Polarity>(opcode: Opcode, shape: Shape, operands: &[OperandInfo]) -> VmResult<BoxedOp> {
    let [_, _, condition] = fixed::<3>(opcode, operands)?;
    match shape {
        Shape::CachedScalar => boxed(ScalarBranch::<P, Cache<bool>> {
            condition: condition.typed_cache()?,
            sync: Synchronizer::default(),
            _polarity: PhantomData,
        }),
        Shape::Scalar => boxed(ScalarBranch::<P, ContainerRef> {
            condition: Rc::clone(condition.container()),
            sync: Synchronizer::new(std::slice::from_ref(condition)),
            _polarity: PhantomData,
        }),
        Shape::Vector => boxed(VectorBranch::<P> {
            condition: Rc::clone(condition.container()),
            sync: Synchronizer::new(std::slice::from_ref(condition)),
            _polarity: PhantomData,
        }),
        other => Err(unsupported(Category::Branch, ElementType::Bool, other)),
    }
}

struct ScalarBranch<P, C> {
    condition: C,
    sync: Synchronizer,
    _polarity: PhantomData<P>,
}

impl<P: Polarity, C: ScalarSlot<bool>> Execute for ScalarBranch<P, C> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        if self.condition.load()? == P::JUMP_ON {
            Ok(Flow::Branch)
        } else {
            Ok(Flow::Next)
        }
    }
}

/// Jumps only if every element of the condition matches.
struct VectorBranch<P> {
    condition: ContainerRef,
    sync: Synchronizer,
    _polarity: PhantomData<P>,
}

impl<P: Polarity> Execute for VectorBranch<P> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let condition = self.condition.view::<bool>()?;
        if condition.cells().iter().all(|c| c.get() == P::JUMP_ON) {
            Ok(Flow::Branch)
        } else {
            Ok(Flow::Next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, memory_operand, run_op};
    use nano_core::{DataContainer, DataType, Instruction, OperandRef};

    fn instruction(opcode: Opcode) -> AcceleratorInstruction {
        AcceleratorInstruction::new(
            Instruction::new(
                opcode,
                &[DataType::Bool],
                &[OperandRef::placeholder(), OperandRef::constant(0), OperandRef::register(0)],
            ),
            0,
        )
    }

    fn label() -> OperandInfo {
        memory_operand(DataContainer::scalar(0_i64))
    }

    fn flow(opcode: Opcode, shape: Shape, condition: OperandInfo) -> Flow {
        let ops = [label(), label(), condition];
        let node = generate(&instruction(opcode), shape, &ops).unwrap();
        run_op(&*node).unwrap()
    }

    #[test]
    fn test_cached_branch() {
        let taken = flow(Opcode::Jmp, Shape::CachedScalar, cached_operand(true, false));
        assert_eq!(taken, Flow::Branch);
        let skipped = flow(Opcode::Jmpn, Shape::CachedScalar, cached_operand(true, false));
        assert_eq!(skipped, Flow::Next);
    }

    #[test]
    fn test_scalar_branch_reads_synced_cache() {
        let condition = cached_operand(false, false);
        condition.typed_cache::<bool>().unwrap().set(true);
        assert_eq!(flow(Opcode::Jmp, Shape::Scalar, condition), Flow::Branch);
    }

    #[test]
    fn test_vector_reduction() {
        let all_true = || memory_operand(DataContainer::vector(vec![true, true]));
        let mixed = || memory_operand(DataContainer::vector(vec![true, false]));
        let all_false = || memory_operand(DataContainer::vector(vec![false, false]));
        assert_eq!(flow(Opcode::Jmp, Shape::Vector, all_true()), Flow::Branch);
        assert_eq!(flow(Opcode::Jmp, Shape::Vector, mixed()), Flow::Next);
        assert_eq!(flow(Opcode::Jmpn, Shape::Vector, mixed()), Flow::Next);
        assert_eq!(flow(Opcode::Jmpn, Shape::Vector, all_false()), Flow::Branch);
    }
}
