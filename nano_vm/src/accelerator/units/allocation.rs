//! Allocation unit: ALLOC and ALLOCR for int64, float64 and bool.
//!
//! A container keeps its backing array whenever the requested type and
//! element count already match, so repeated allocations inside a loop do
//! not churn memory. Only the shape is updated in that case.

use super::{BoxedOp, boxed, unsupported};
use crate::accelerator::cache::CachedElement;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataError, Lengths, Opcode};
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "allocation unit";

/// Build the node for an ALLOC or ALLOCR of element type `T`.
///
/// ALLOC operands are `[dest, length0, length1, ...]`; with no length
/// operand the destination becomes a scalar. ALLOCR operands are
/// `[dest, shape_source]`.
pub fn generate<T: CachedElement>(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let opcode = instruction.opcode();
    let Some((dest, rest)) = operands.split_first() else {
        return Err(RuntimeError::invalid_operand_count(opcode, 1, 0));
    };
    let post = Synchronizer::new(std::slice::from_ref(dest));
    match (opcode, rest.len()) {
        (Opcode::Alloc, 0) => match shape {
            Shape::Scalar | Shape::CachedScalar => boxed(ScalarAlloc::<T> {
                dest: Rc::clone(dest.container()),
                post,
                _type: PhantomData,
            }),
            other => Err(unsupported(Category::Allocation, T::ELEMENT, other)),
        },
        (Opcode::Alloc, _) => match shape {
            Shape::Vector => boxed(VectorAlloc::<T> {
                dest: Rc::clone(dest.container()),
                lengths: rest.iter().map(|operand| Rc::clone(operand.container())).collect(),
                pre: Synchronizer::new(rest),
                post,
                _type: PhantomData,
            }),
            other => Err(unsupported(Category::Allocation, T::ELEMENT, other)),
        },
        (Opcode::Allocr, 1) => boxed(SameShapeAlloc::<T> {
            dest: Rc::clone(dest.container()),
            source: Rc::clone(rest[0].container()),
            pre: Synchronizer::new(rest),
            post,
            _type: PhantomData,
        }),
        (Opcode::Allocr, found) => Err(RuntimeError::invalid_operand_count(opcode, 2, found + 1)),
        (other, _) => Err(RuntimeError::invalid_opcode(other, UNIT)),
    }
}

/// Lengths held by `containers`, each an int64 scalar.
pub(crate) fn read_lengths(containers: &[ContainerRef]) -> VmResult<Lengths> {
    containers
        .iter()
        .map(|container| -> VmResult<usize> {
            let length = container.get::<i64>()?;
            Ok(usize::try_from(length).map_err(|_| DataError::NegativeLength(length))?)
        })
        .collect()
}

struct ScalarAlloc<T> {
    dest: ContainerRef,
    post: Synchronizer,
    _type: PhantomData<T>,
}

impl<T: CachedElement> Execute for ScalarAlloc<T> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        let ready = self.dest.is_allocated()
            && self.dest.data_type() == T::DATA_TYPE
            && self.dest.size() != 0;
        if !ready {
            self.dest.reallocate(T::DATA_TYPE, &[])?;
            self.post.to_cache()?;
        }
        Ok(Flow::Next)
    }
}

struct VectorAlloc<T> {
    dest: ContainerRef,
    lengths: SmallVec<[ContainerRef; 3]>,
    pre: Synchronizer,
    post: Synchronizer,
    _type: PhantomData<T>,
}

impl<T: CachedElement> Execute for VectorAlloc<T> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.pre.to_memory()?;
        let lengths = read_lengths(&self.lengths)?;
        self.dest.reallocate(T::DATA_TYPE, &lengths)?;
        self.post.to_cache()?;
        Ok(Flow::Next)
    }
}

struct SameShapeAlloc<T> {
    dest: ContainerRef,
    source: ContainerRef,
    pre: Synchronizer,
    post: Synchronizer,
    _type: PhantomData<T>,
}

impl<T: CachedElement> Execute for SameShapeAlloc<T> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.pre.to_memory()?;
        self.dest.reallocate(T::DATA_TYPE, &self.source.lengths())?;
        self.post.to_cache()?;
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, memory_operand, run_op};
    use nano_core::{DataContainer, DataType, Instruction, OperandRef};

    fn instruction(
        opcode: Opcode,
        data_type: DataType,
        operand_count: usize,
    ) -> AcceleratorInstruction {
        let operands: Vec<OperandRef> = (0..operand_count).map(OperandRef::register).collect();
        AcceleratorInstruction::new(Instruction::new(opcode, &[data_type], &operands), 0)
    }

    #[test]
    fn test_vector_alloc_keeps_identity_for_same_size() {
        let dest = memory_operand(DataContainer::new());
        let ops = [dest.clone(), cached_operand(2_i64, false), cached_operand(3_i64, false)];
        let alloc = instruction(Opcode::Alloc, DataType::Float64, 3);
        let node = generate::<f64>(&alloc, Shape::Vector, &ops).unwrap();

        run_op(&*node).unwrap();
        let first = dest.container().data();
        assert_eq!(dest.container().lengths().as_slice(), &[2, 3]);

        run_op(&*node).unwrap();
        assert!(dest.container().data().ptr_eq(&first));

        ops[2].typed_cache::<i64>().unwrap().set(4);
        run_op(&*node).unwrap();
        assert!(!dest.container().data().ptr_eq(&first));
        assert_eq!(dest.container().size(), 8);
    }

    #[test]
    fn test_vector_alloc_same_size_updates_shape() {
        let dest = memory_operand(DataContainer::vector(vec![0_i64; 6]));
        let before = dest.container().data();
        let ops = [
            dest.clone(),
            memory_operand(DataContainer::scalar(3_i64)),
            memory_operand(DataContainer::scalar(2_i64)),
        ];
        let alloc = instruction(Opcode::Alloc, DataType::Int64, 3);
        let node = generate::<i64>(&alloc, Shape::Vector, &ops).unwrap();
        run_op(&*node).unwrap();
        assert!(dest.container().data().ptr_eq(&before));
        assert_eq!(dest.container().lengths().as_slice(), &[3, 2]);
    }

    #[test]
    fn test_negative_length() {
        let ops = [
            memory_operand(DataContainer::new()),
            memory_operand(DataContainer::scalar(-1_i64)),
        ];
        let alloc = instruction(Opcode::Alloc, DataType::Bool, 2);
        let node = generate::<bool>(&alloc, Shape::Vector, &ops).unwrap();
        assert!(run_op(&*node).is_err());
    }

    #[test]
    fn test_scalar_alloc_is_idempotent() {
        let dest = memory_operand(DataContainer::scalar(7_i64));
        let node = generate::<i64>(
            &instruction(Opcode::Alloc, DataType::Int64, 1),
            Shape::Scalar,
            std::slice::from_ref(&dest),
        )
        .unwrap();
        run_op(&*node).unwrap();
        assert_eq!(dest.container().get::<i64>(), Ok(7));

        let fresh = memory_operand(DataContainer::new());
        let node = generate::<i64>(
            &instruction(Opcode::Alloc, DataType::Int64, 1),
            Shape::Scalar,
            std::slice::from_ref(&fresh),
        )
        .unwrap();
        run_op(&*node).unwrap();
        assert_eq!(fresh.container().get::<i64>(), Ok(0));
    }

    #[test]
    fn test_allocr_copies_shape() {
        let dest = memory_operand(DataContainer::new());
        let source = memory_operand(DataContainer::array(vec![0.5_f64; 6], &[2, 3]).unwrap());
        let ops = [dest.clone(), source];
        let allocr = instruction(Opcode::Allocr, DataType::Bool, 2);
        let node = generate::<bool>(&allocr, Shape::Vector, &ops).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(dest.container().data_type(), DataType::Bool);
        assert_eq!(dest.container().lengths().as_slice(), &[2, 3]);
    }
}
