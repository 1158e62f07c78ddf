//! Script function calls: CALL RET POP MOVPOP REFPOP ALLOCP and EX/RETURNED.
//!
//! A CALL pushes the return address and its arguments, then branches to the
//! function's entry node. The callee pops its parameters with MOVPOP or
//! REFPOP, and RET pushes the return value before jumping back to the
//! address saved by the CALL.

use crate::accelerator::cache::{Cache, CachedElement};
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, ExtendedOpcode};
use crate::accelerator::node::{Execute, Flow, NodeId};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::accelerator::units::{BoxedOp, boxed};
use crate::error::{RuntimeError, VmResult};
use crate::processor::execution;
use nano_core::{ContainerRef, DataContainer, DataType, Opcode};
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "internal function control unit";

/// Build the node for a function-control instruction.
pub fn generate(
    instruction: &AcceleratorInstruction,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let sync = Synchronizer::new(operands);
    match instruction.opcode() {
        Opcode::Call => {
            if operands.len() < 2 {
                return Err(RuntimeError::invalid_operand_count(Opcode::Call, 2, operands.len()));
            }
            boxed(Call {
                arguments: operands[2..]
                    .iter()
                    .map(|operand| Rc::clone(operand.container()))
                    .collect(),
                return_address: instruction.reordered_address() + 1,
                sync,
            })
        }
        Opcode::Ret => boxed(Return {
            value: operands.get(2).map(|operand| Rc::clone(operand.container())),
            sync,
        }),
        Opcode::Pop => boxed(Pop),
        Opcode::Allocp => boxed(AllocTopShape {
            data_type: instruction.data_type(),
            dest: Rc::clone(destination(Opcode::Allocp, operands)?.container()),
            sync,
        }),
        Opcode::Movpop => movpop(instruction.data_type(), operands, sync),
        Opcode::Refpop => {
            let dest = destination(Opcode::Refpop, operands)?;
            boxed(ReferTop {
                dest: Rc::clone(dest.container()),
                scalar: dest.scalar,
                sync,
            })
        }
        Opcode::Ex => match instruction.extended_opcode() {
            Some(ExtendedOpcode::Returned) => boxed(Returned { sync }),
            None => Err(RuntimeError::internal(format!(
                "EX without an extended opcode reached the {UNIT}"
            ))),
        },
        other => Err(RuntimeError::invalid_opcode(other, UNIT)),
    }
}

fn destination(opcode: Opcode, operands: &[OperandInfo]) -> VmResult<&OperandInfo> {
    operands
        .first()
        .ok_or_else(|| RuntimeError::invalid_operand_count(opcode, 1, 0))
}

fn movpop(data_type: DataType, operands: &[OperandInfo], sync: Synchronizer) -> VmResult<BoxedOp> {
    let dest = destination(Opcode::Movpop, operands)?;
    match (data_type, dest.is_cached_scalar()) {
        (DataType::Int64, true) => cached_movpop::<i64>(dest),
        (DataType::Float64, true) => cached_movpop::<f64>(dest),
        (DataType::Bool, true) => cached_movpop::<bool>(dest),
        (DataType::Int64, false) if dest.scalar => scalar_movpop::<i64>(dest, sync),
        (DataType::Float64, false) if dest.scalar => scalar_movpop::<f64>(dest, sync),
        (DataType::Bool, false) if dest.scalar => scalar_movpop::<bool>(dest, sync),
        _ => boxed(MovePopped {
            data_type,
            dest: Rc::clone(dest.container()),
            sync,
        }),
    }
}

fn cached_movpop<T: CachedElement>(dest: &OperandInfo) -> VmResult<BoxedOp> {
    boxed(CachedMovePopped::<T> {
        cache: dest.typed_cache()?,
    })
}

fn scalar_movpop<T: CachedElement>(dest: &OperandInfo, sync: Synchronizer) -> VmResult<BoxedOp> {
    boxed(ScalarMovePopped::<T> {
        dest: Rc::clone(dest.container()),
        sync,
        _type: PhantomData,
    })
}

// =============================================================================
// Call & Return
// =============================================================================

struct Call {
    arguments: SmallVec<[ContainerRef; 4]>,
    return_address: NodeId,
    sync: Synchronizer,
}

impl Execute for Call {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        ctx.stacks.push_address(self.return_address);
        for argument in &self.arguments {
            ctx.stacks.push_data(Rc::clone(argument));
        }
        Ok(Flow::Branch)
    }
}

struct Return {
    value: Option<ContainerRef>,
    sync: Synchronizer,
}

impl Execute for Return {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let address = ctx.stacks.pop_address()?;
        let value = match &self.value {
            Some(value) => Rc::clone(value),
            None => DataContainer::new().shared(),
        };
        ctx.stacks.push_data(value);
        Ok(Flow::Goto(address))
    }
}

/// Placed after a CALL: the callee may have written through by-reference
/// arguments, so their caches are reloaded.
struct Returned {
    sync: Synchronizer,
}

impl Execute for Returned {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

// =============================================================================
// Data Stack
// =============================================================================

struct Pop;

impl Execute for Pop {
    #[inline]
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        ctx.stacks.pop_data()?;
        Ok(Flow::Next)
    }
}

struct AllocTopShape {
    data_type: DataType,
    dest: ContainerRef,
    sync: Synchronizer,
}

impl Execute for AllocTopShape {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let lengths = ctx.stacks.peek_data()?.lengths();
        self.dest.reallocate(self.data_type, &lengths)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct CachedMovePopped<T: CachedElement> {
    cache: Cache<T>,
}

impl<T: CachedElement> Execute for CachedMovePopped<T> {
    #[inline]
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let src = ctx.stacks.pop_data()?;
        self.cache.set(src.get::<T>()?);
        Ok(Flow::Next)
    }
}

struct ScalarMovePopped<T> {
    dest: ContainerRef,
    sync: Synchronizer,
    _type: PhantomData<T>,
}

impl<T: CachedElement> Execute for ScalarMovePopped<T> {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let src = ctx.stacks.pop_data()?;
        self.dest.set(src.get::<T>()?)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

/// Value copy of an equally sized array of any type.
struct MovePopped {
    data_type: DataType,
    dest: ContainerRef,
    sync: Synchronizer,
}

impl Execute for MovePopped {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let src = ctx.stacks.pop_data()?;
        execution::mov(self.data_type, &self.dest, &src)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct ReferTop {
    dest: ContainerRef,
    scalar: bool,
    sync: Synchronizer,
}

impl Execute for ReferTop {
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let src = ctx.stacks.pop_data()?;
        if self.scalar {
            self.dest.set_array_data(src.data(), src.offset(), &[]);
        } else {
            self.dest.set_array_data(src.data(), src.offset(), &src.lengths());
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, memory_operand};
    use crate::interconnect::Interconnect;
    use crate::processor::GenericProcessor;
    use nano_core::{Instruction, Memory, OperandRef};

    fn instruction(
        opcode: Opcode,
        data_type: DataType,
        operand_count: usize,
    ) -> AcceleratorInstruction {
        let operands: Vec<OperandRef> = (0..operand_count).map(OperandRef::register).collect();
        AcceleratorInstruction::new(Instruction::new(opcode, &[data_type], &operands), 3)
    }

    #[test]
    fn test_call_then_return_round_trip() {
        let memory = Memory::new();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 2);
        ctx.stacks.bind_node_table(10);

        let label = memory_operand(DataContainer::scalar(7_i64));
        let argument = memory_operand(DataContainer::scalar(2.5_f64));
        let call = generate(
            &instruction(Opcode::Call, DataType::Void, 3),
            &[memory_operand(DataContainer::new()), label.clone(), argument],
        )
        .unwrap();
        assert_eq!(call.execute(&mut ctx).unwrap(), Flow::Branch);
        assert_eq!((ctx.stacks.address_depth(), ctx.stacks.data_depth()), (1, 1));

        let param = cached_operand(0.0_f64, false);
        let movpop = instruction(Opcode::Movpop, DataType::Float64, 1);
        let pop = generate(&movpop, std::slice::from_ref(&param)).unwrap();
        pop.execute(&mut ctx).unwrap();
        assert_eq!(param.typed_cache::<f64>().unwrap().get(), 2.5);

        let ret = generate(
            &instruction(Opcode::Ret, DataType::Void, 2),
            &[memory_operand(DataContainer::new()), label],
        )
        .unwrap();
        assert_eq!(ret.execute(&mut ctx).unwrap(), Flow::Goto(4));
        assert_eq!((ctx.stacks.address_depth(), ctx.stacks.data_depth()), (0, 1));
        assert!(!ctx.stacks.peek_data().unwrap().is_allocated());
    }

    #[test]
    fn test_refpop_vector_aliases() {
        let memory = Memory::new();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 2);

        let source = DataContainer::vector(vec![1_i64, 2, 3]).shared();
        ctx.stacks.push_data(Rc::clone(&source));
        let dest = memory_operand(DataContainer::new());
        let refpop = instruction(Opcode::Refpop, DataType::Int64, 1);
        let node = generate(&refpop, std::slice::from_ref(&dest)).unwrap();
        node.execute(&mut ctx).unwrap();
        assert!(dest.container().shares_array_with(&source));
        assert_eq!(dest.container().lengths().as_slice(), &[3]);
    }

    #[test]
    fn test_allocp_then_general_movpop() {
        let memory = Memory::new();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 2);

        ctx.stacks.push_data(DataContainer::vector(vec![true, false]).shared());
        let dest = memory_operand(DataContainer::new());
        let ops = std::slice::from_ref(&dest);
        generate(&instruction(Opcode::Allocp, DataType::Bool, 1), ops)
            .unwrap()
            .execute(&mut ctx)
            .unwrap();
        generate(&instruction(Opcode::Movpop, DataType::Bool, 1), ops)
            .unwrap()
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(dest.container().to_vec::<bool>().unwrap(), vec![true, false]);
        assert_eq!(ctx.stacks.data_depth(), 0);
    }

    #[test]
    fn test_pop_underflow() {
        let memory = Memory::new();
        let interconnect = Interconnect::new();
        let processor = GenericProcessor::new();
        let mut ctx = ExecutionContext::new(&memory, &interconnect, &processor, 2);
        let node = generate(&instruction(Opcode::Pop, DataType::Void, 1), &[]).unwrap();
        assert!(node.execute(&mut ctx).is_err());
    }
}
