//! Transfer unit: MOV, CAST and FILL, plus fused runs of cached MOVs.

use super::ops::Convert;
use super::{BoxedOp, boxed, fixed, unsupported};
use crate::accelerator::cache::{Cache, CachedElement};
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataError, DataType, Opcode};
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "transfer unit";

/// Build the node for a MOV, CAST or FILL.
///
/// Operand 0 has the instruction's first data type; operand 1 has the second
/// data type for CAST and the same type otherwise.
pub fn generate(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let opcode = instruction.opcode();
    if !matches!(opcode, Opcode::Mov | Opcode::Cast | Opcode::Fill) {
        return Err(RuntimeError::invalid_opcode(opcode, UNIT));
    }
    let dest_type = instruction.data_type();
    let src_type = match opcode {
        Opcode::Cast => instruction.data_types().get(1).copied().unwrap_or(dest_type),
        _ => dest_type,
    };
    match (dest_type, src_type) {
        (DataType::Int64, DataType::Int64) => typed::<i64, i64>(opcode, shape, operands),
        (DataType::Float64, DataType::Float64) => typed::<f64, f64>(opcode, shape, operands),
        (DataType::Bool, DataType::Bool) => typed::<bool, bool>(opcode, shape, operands),
        (DataType::Int64, DataType::Float64) => typed::<i64, f64>(opcode, shape, operands),
        (DataType::Float64, DataType::Int64) => typed::<f64, i64>(opcode, shape, operands),
        _ => Err(RuntimeError::internal(format!(
            "no transfer from {src_type} to {dest_type}"
        ))),
    }
}

fn typed<D, S>(opcode: Opcode, shape: Shape, operands: &[OperandInfo]) -> VmResult<BoxedOp>
where
    D: CachedElement + Convert<S>,
    S: CachedElement,
{
    let [dest, src] = fixed::<2>(opcode, operands)?;
    match (shape, opcode) {
        (Shape::CachedScalar, _) => boxed(CachedCopy::<D, S> {
            dest: dest.typed_cache()?,
            src: src.typed_cache()?,
        }),
        (Shape::Scalar, _) => boxed(ScalarCopy::<D, S> {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
            _types: PhantomData,
        }),
        (Shape::Vector | Shape::VectorScalar, Opcode::Fill) => boxed(Fill::<D, S> {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
            _types: PhantomData,
        }),
        (Shape::Vector | Shape::VectorScalar | Shape::ScalarVector, _) => boxed(MemoryCopy::<D, S> {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
            _types: PhantomData,
        }),
        (other, _) => Err(unsupported(Category::Transfer, D::ELEMENT, other)),
    }
}

/// Build one node for a fused run of cached MOVs of element type `T`.
pub fn generate_multiple<T: CachedElement>(
    instruction: &AcceleratorInstruction,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    if operands.len() % 2 != 0 || instruction.fused_opcodes().iter().any(|op| *op != Opcode::Mov) {
        return Err(RuntimeError::internal(format!(
            "malformed multiple transfer: {instruction}"
        )));
    }
    let pairs: SmallVec<[(Cache<T>, Cache<T>); 4]> = operands
        .chunks_exact(2)
        .map(|pair| Ok((pair[0].typed_cache::<T>()?, pair[1].typed_cache::<T>()?)))
        .collect::<VmResult<_>>()?;
    boxed(CachedMultipleCopy { pairs })
}

// =============================================================================
// Nodes
// =============================================================================

struct CachedCopy<D: CachedElement, S: CachedElement> {
    dest: Cache<D>,
    src: Cache<S>,
}

impl<D: CachedElement + Convert<S>, S: CachedElement> Execute for CachedCopy<D, S> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(D::convert(self.src.get()));
        Ok(Flow::Next)
    }
}

struct CachedMultipleCopy<T: CachedElement> {
    pairs: SmallVec<[(Cache<T>, Cache<T>); 4]>,
}

impl<T: CachedElement> Execute for CachedMultipleCopy<T> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        for (dest, src) in &self.pairs {
            dest.set(src.get());
        }
        Ok(Flow::Next)
    }
}

struct ScalarCopy<D, S> {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
    _types: PhantomData<(D, S)>,
}

impl<D: CachedElement + Convert<S>, S: CachedElement> Execute for ScalarCopy<D, S> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        self.dest.set(D::convert(self.src.get::<S>()?))?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

/// Element-wise copy between equally sized operands.
struct MemoryCopy<D, S> {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
    _types: PhantomData<(D, S)>,
}

impl<D: CachedElement + Convert<S>, S: CachedElement> Execute for MemoryCopy<D, S> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<D>()?;
        let src = self.src.view::<S>()?;
        if dest.len() != src.len() {
            if self.dest.is_scalar() && src.len() != 1 {
                return Err(RuntimeError::array_too_large_for_scalar(src.len()));
            }
            return Err(DataError::SizeMismatch {
                expected: dest.len(),
                found: src.len(),
            }
            .into());
        }
        for (d, s) in dest.cells().iter().zip(src.cells()) {
            d.set(D::convert(s.get()));
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct Fill<D, S> {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
    _types: PhantomData<(D, S)>,
}

impl<D: CachedElement + Convert<S>, S: CachedElement> Execute for Fill<D, S> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let value = D::convert(self.src.get::<S>()?);
        for d in self.dest.view::<D>()?.cells() {
            d.set(value);
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}
