//! Subscript unit: MOVELM and REFELM on arrays of rank 1 to 3.
//!
//! Operands are `[dest, array, index0, index1, ...]`. The flat position of
//! an element is computed row-major from the array's current lengths.

use super::{BoxedOp, ScalarSlot, boxed, unsupported};
use crate::accelerator::cache::{Cache, CachedElement};
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataError, DataResult, Opcode};
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "subscript unit";

/// Highest rank handled here; the scheduler bypasses anything above.
pub const MAX_RANK: usize = 3;

/// Row-major flat position of `indices` in an array shaped `lengths`.
pub fn flatten(lengths: &[usize], indices: &[i64]) -> DataResult<usize> {
    if lengths.len() != indices.len() {
        return Err(DataError::RankMismatch {
            array_rank: lengths.len(),
            index_count: indices.len(),
        });
    }
    let mut flat = 0usize;
    for (dimension, (&length, &index)) in lengths.iter().zip(indices).enumerate() {
        let position = usize::try_from(index)
            .ok()
            .filter(|&i| i < length)
            .ok_or(DataError::SubscriptOutOfBounds {
                index,
                dimension,
                length,
            })?;
        flat = flat * length + position;
    }
    Ok(flat)
}

/// Build the node for a MOVELM or REFELM of element type `T`.
pub fn generate<T: CachedElement>(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let opcode = instruction.opcode();
    if !matches!(opcode, Opcode::Movelm | Opcode::Refelm) {
        return Err(RuntimeError::invalid_opcode(opcode, UNIT));
    }
    if operands.len() < 3 {
        return Err(RuntimeError::invalid_operand_count(opcode, 3, operands.len()));
    }
    match operands.len() - 2 {
        1 => ranked::<T, 1>(opcode, shape, operands),
        2 => ranked::<T, 2>(opcode, shape, operands),
        3 => ranked::<T, 3>(opcode, shape, operands),
        rank => Err(RuntimeError::internal(format!(
            "rank {rank} exceeds the subscript unit limit of {MAX_RANK}"
        ))),
    }
}

fn indices<I, const R: usize>(
    operands: &[OperandInfo],
    slot: impl Fn(&OperandInfo) -> VmResult<I>,
) -> VmResult<[I; R]> {
    let collected = operands[2..].iter().map(slot).collect::<VmResult<Vec<I>>>()?;
    let found = collected.len();
    collected
        .try_into()
        .map_err(|_| RuntimeError::invalid_operand_count(Opcode::Movelm, R + 2, found + 2))
}

fn cached_index(operand: &OperandInfo) -> VmResult<Cache<i64>> {
    operand.typed_cache::<i64>()
}

fn memory_index(operand: &OperandInfo) -> VmResult<ContainerRef> {
    Ok(Rc::clone(operand.container()))
}

fn ranked<T: CachedElement, const R: usize>(
    opcode: Opcode,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let src = Rc::clone(operands[1].container());
    match (opcode, shape) {
        (Opcode::Movelm, Shape::CachedScalar) => boxed(MoveElement::<T, Cache<T>, Cache<i64>, R> {
            dest: operands[0].typed_cache()?,
            src,
            indices: indices(operands, cached_index)?,
            sync: Synchronizer::default(),
            _type: PhantomData,
        }),
        (Opcode::Movelm, Shape::Scalar) => boxed(MoveElement::<T, ContainerRef, ContainerRef, R> {
            dest: Rc::clone(operands[0].container()),
            src,
            indices: indices(operands, memory_index)?,
            sync: Synchronizer::excluding(operands, &[1]),
            _type: PhantomData,
        }),
        (Opcode::Refelm, Shape::CachedScalar) => boxed(ReferElement::<Cache<i64>, R> {
            dest: Rc::clone(operands[0].container()),
            src,
            indices: indices(operands, cached_index)?,
            sync: Synchronizer::default(),
        }),
        (Opcode::Refelm, Shape::Scalar) => boxed(ReferElement::<ContainerRef, R> {
            dest: Rc::clone(operands[0].container()),
            src,
            indices: indices(operands, memory_index)?,
            sync: Synchronizer::excluding(operands, &[0, 1]),
        }),
        (_, other) => Err(unsupported(Category::Subscript, T::ELEMENT, other)),
    }
}

#[inline(always)]
fn read_indices<I: ScalarSlot<i64>, const R: usize>(indices: &[I; R]) -> VmResult<[i64; R]> {
    let mut values = [0i64; R];
    for (value, index) in values.iter_mut().zip(indices) {
        *value = index.load()?;
    }
    Ok(values)
}

/// Element read by value into `dest`.
struct MoveElement<T, D, I, const R: usize> {
    dest: D,
    src: ContainerRef,
    indices: [I; R],
    sync: Synchronizer,
    _type: PhantomData<T>,
}

impl<T, D, I, const R: usize> Execute for MoveElement<T, D, I, R>
where
    T: CachedElement,
    D: ScalarSlot<T>,
    I: ScalarSlot<i64>,
{
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let position = flatten(&self.src.lengths(), &read_indices(&self.indices)?)?;
        self.dest.store(self.src.get_at::<T>(position)?)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

/// `dest` re-pointed at one element of `src`.
struct ReferElement<I, const R: usize> {
    dest: ContainerRef,
    src: ContainerRef,
    indices: [I; R],
    sync: Synchronizer,
}

impl<I: ScalarSlot<i64>, const R: usize> Execute for ReferElement<I, R> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let position = flatten(&self.src.lengths(), &read_indices(&self.indices)?)?;
        self.dest
            .set_array_data(self.src.data(), self.src.offset() + position, &[]);
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, memory_operand, run_op};
    use nano_core::{DataContainer, DataType, Instruction, OperandRef};

    fn instruction(opcode: Opcode, rank: usize) -> AcceleratorInstruction {
        let operands: Vec<OperandRef> = (0..rank + 2).map(OperandRef::register).collect();
        AcceleratorInstruction::new(Instruction::new(opcode, &[DataType::Int64], &operands), 0)
    }

    #[test]
    fn test_flatten_row_major() {
        assert_eq!(flatten(&[3, 4], &[2, 1]), Ok(2 * 4 + 1));
        assert_eq!(flatten(&[2, 3, 4], &[1, 2, 3]), Ok(3 * 4 + 2 * 4 + 3));
        assert!(flatten(&[3], &[3]).is_err());
        assert!(flatten(&[3], &[-1]).is_err());
        assert!(flatten(&[3, 3], &[1]).is_err());
    }

    #[test]
    fn test_cached_movelm_2d() {
        let array = DataContainer::array((0..12).collect::<Vec<i64>>(), &[3, 4]).unwrap();
        let ops = [
            cached_operand(0_i64, false),
            memory_operand(array),
            cached_operand(2_i64, false),
            cached_operand(1_i64, false),
        ];
        let movelm = instruction(Opcode::Movelm, 2);
        let node = generate::<i64>(&movelm, Shape::CachedScalar, &ops).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(ops[0].typed_cache::<i64>().unwrap().get(), 9);
    }

    #[test]
    fn test_refelm_aliases_element() {
        let array = memory_operand(DataContainer::vector(vec![1.0_f64, 2.0, 3.0]));
        let dest = memory_operand(DataContainer::new());
        let ops = [dest.clone(), array.clone(), memory_operand(DataContainer::scalar(1_i64))];
        let node = generate::<f64>(&instruction(Opcode::Refelm, 1), Shape::Scalar, &ops).unwrap();
        run_op(&*node).unwrap();
        dest.container().set(20.0_f64).unwrap();
        assert_eq!(array.container().to_vec::<f64>().unwrap(), vec![1.0, 20.0, 3.0]);
        assert!(dest.container().is_scalar());
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let ops = [
            memory_operand(DataContainer::scalar(false)),
            memory_operand(DataContainer::vector(vec![true, false])),
            memory_operand(DataContainer::scalar(2_i64)),
        ];
        let node = generate::<bool>(&instruction(Opcode::Movelm, 1), Shape::Scalar, &ops).unwrap();
        assert!(run_op(&*node).is_err());
    }

    #[test]
    fn test_rank_four_rejected() {
        let mut ops = vec![
            memory_operand(DataContainer::scalar(0_i64)),
            memory_operand(DataContainer::array(vec![0_i64; 16], &[2, 2, 2, 2]).unwrap()),
        ];
        ops.extend((0..4).map(|_| memory_operand(DataContainer::scalar(0_i64))));
        assert!(generate::<i64>(&instruction(Opcode::Movelm, 4), Shape::Scalar, &ops).is_err());
    }
}
