//! Bypass unit: instructions with no specialized node run on the fallback
//! processor, with every cached operand synchronized around the call.

use super::{BoxedOp, boxed};
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::AcceleratorInstruction;
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{Instruction, Opcode};

/// Build a node delegating `instruction` to the processor.
pub fn generate(
    instruction: &AcceleratorInstruction,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    // ALLOC may replace the destination's array; its stale cache must not
    // be written over the new one.
    let pre = match instruction.opcode() {
        Opcode::Alloc => Synchronizer::excluding(operands, &[0]),
        _ => Synchronizer::new(operands),
    };
    boxed(Bypass {
        instruction: instruction.instruction().clone(),
        address: instruction.unreordered_address(),
        pre,
        post: Synchronizer::new(operands),
    })
}

struct Bypass {
    instruction: Instruction,
    address: usize,
    pre: Synchronizer,
    post: Synchronizer,
}

impl Execute for Bypass {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.pre.to_memory()?;
        let next = ctx
            .processor
            .process(&self.instruction, ctx.memory, ctx.interconnect, self.address)?;
        match next {
            None => Ok(Flow::Halt),
            Some(pc) if pc == self.address + 1 => {
                self.post.to_cache()?;
                Ok(Flow::Next)
            }
            Some(pc) => Err(RuntimeError::internal(format!(
                "bypassed {} transferred control from {} to {}",
                self.instruction.opcode(),
                self.address,
                pc
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, run_op};
    use crate::error::RuntimeErrorKind;
    use crate::interconnect::Interconnect;
    use crate::processor::GenericProcessor;
    use nano_core::{DataContainer, DataType, Memory, OperandRef, Partition};

    fn bypassed(instruction: Instruction) -> AcceleratorInstruction {
        AcceleratorInstruction::new(instruction, 0)
    }

    #[test]
    fn test_processor_error_propagates() {
        let mut memory = Memory::new();
        memory.push(Partition::Constant, DataContainer::string("main")).unwrap();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 4);

        let endfun =
            Instruction::new(Opcode::Endfun, &[DataType::String], &[OperandRef::constant(0)]);
        let inst = bypassed(endfun);
        let node = generate(&inst, &[]).unwrap();
        let err = node.execute(&mut ctx).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::FunctionEndedWithoutReturn { .. }));
    }

    #[test]
    fn test_end_halts() {
        let end = Instruction::new(Opcode::End, &[DataType::Void], &[OperandRef::placeholder()]);
        let inst = bypassed(end);
        let node = generate(&inst, &[cached_operand(0_i64, false)]).unwrap();
        assert_eq!(run_op(&*node).unwrap(), Flow::Halt);
    }
}
