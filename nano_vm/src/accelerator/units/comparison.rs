//! Comparison unit: EQ NEQ GT LT GEQ LEQ over int64 and float64 inputs.

use super::ops::{Arith, CompareOp};
use super::{BoxedOp, boxed, ensure_size, fixed, unsupported};
use crate::accelerator::cache::Cache;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::VmResult;
use nano_core::ContainerRef;
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "comparison unit";

/// Build the node for a comparison whose inputs have element type `T`.
pub fn generate<T: Arith>(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let opcode = instruction.opcode();
    let [dest, a, b] = fixed::<3>(opcode, operands)?;
    match shape {
        Shape::CachedScalar => {
            let dest = dest.typed_cache::<bool>()?;
            let (a, b) = (a.typed_cache::<T>()?, b.typed_cache::<T>()?);
            with_compare_op!(opcode, UNIT, |Op| boxed(CachedCompare::<T, Op> {
                dest,
                a,
                b,
                _op: PhantomData,
            }))
        }
        Shape::Scalar => with_compare_op!(opcode, UNIT, |Op| boxed(ScalarCompare::<T, Op> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        })),
        Shape::Vector => with_compare_op!(opcode, UNIT, |Op| boxed(VectorCompare::<T, Op> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        })),
        other => Err(unsupported(Category::Comparison, T::ELEMENT, other)),
    }
}

struct CachedCompare<T: Arith, O> {
    dest: Cache<bool>,
    a: Cache<T>,
    b: Cache<T>,
    _op: PhantomData<O>,
}

impl<T: Arith, O: CompareOp<T>> Execute for CachedCompare<T, O> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(O::apply(self.a.get(), self.b.get()));
        Ok(Flow::Next)
    }
}

struct ScalarCompare<T: Arith, O> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: CompareOp<T>> Execute for ScalarCompare<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        self.dest.set(O::apply(self.a.get::<T>()?, self.b.get::<T>()?))?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct VectorCompare<T: Arith, O> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: CompareOp<T>> Execute for VectorCompare<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<bool>()?;
        let a = self.a.view::<T>()?;
        let b = self.b.view::<T>()?;
        ensure_size(dest.len(), a.len())?;
        ensure_size(dest.len(), b.len())?;
        for ((d, a), b) in dest.cells().iter().zip(a.cells()).zip(b.cells()) {
            d.set(O::apply(a.get(), b.get()));
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}
