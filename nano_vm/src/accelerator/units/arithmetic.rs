//! Arithmetic unit: ADD SUB MUL DIV REM NEG, single and fused.

use super::ops::{Add, Arith, BinaryOp, Neg, Sub, UnaryOp};
use super::{BoxedOp, boxed, ensure_size, fixed, unsupported};
use crate::accelerator::cache::Cache;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, Opcode};
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "arithmetic unit";

/// Build the node for a single arithmetic instruction.
pub fn generate<T: Arith>(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    single::<T>(instruction.opcode(), shape, operands)
}

/// Build one node running two fused arithmetic instructions in order.
pub fn generate_dual<T: Arith>(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let (opcodes, starts) = (instruction.fused_opcodes(), instruction.fused_inputs());
    if opcodes.len() != 2 || starts.len() != 2 || starts[1] > operands.len() {
        return Err(RuntimeError::internal(format!(
            "malformed fused instruction: {instruction}"
        )));
    }
    match shape {
        Shape::CachedScalar | Shape::Vector => {
            let first = single::<T>(opcodes[0], shape, &operands[..starts[1]])?;
            let second = single::<T>(opcodes[1], shape, &operands[starts[1]..])?;
            boxed(Dual { first, second })
        }
        other => Err(unsupported(Category::DualArithmetic, T::ELEMENT, other)),
    }
}

fn single<T: Arith>(opcode: Opcode, shape: Shape, operands: &[OperandInfo]) -> VmResult<BoxedOp> {
    if opcode == Opcode::Neg {
        return unary::<T>(shape, operands);
    }
    let [dest, a, b] = fixed::<3>(opcode, operands)?;
    match shape {
        Shape::CachedScalar => cached::<T>(opcode, dest, a, b),
        Shape::Scalar => with_binary_op!(opcode, UNIT, |Op| boxed(ScalarBinary::<T, Op> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        })),
        Shape::Vector => with_binary_op!(opcode, UNIT, |Op| boxed(VectorBinary::<T, Op> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        })),
        other => Err(unsupported(Category::Arithmetic, T::ELEMENT, other)),
    }
}

fn cached<T: Arith>(
    opcode: Opcode,
    dest: &OperandInfo,
    a: &OperandInfo,
    b: &OperandInfo,
) -> VmResult<BoxedOp> {
    let target = dest.typed_cache::<T>()?;

    // x = x + c, x = x - c
    let self_update = matches!(opcode, Opcode::Add | Opcode::Sub)
        && Rc::ptr_eq(dest.container(), a.container())
        && b.constant;
    if self_update {
        let constant: T = b.container().get()?;
        return match (opcode, constant == T::ONE) {
            (Opcode::Add, true) => boxed(CachedIncrement { target }),
            (Opcode::Sub, true) => boxed(CachedDecrement { target }),
            (Opcode::Add, false) => boxed(CachedConstant::<T, Add> {
                target,
                constant,
                _op: PhantomData,
            }),
            _ => boxed(CachedConstant::<T, Sub> {
                target,
                constant,
                _op: PhantomData,
            }),
        };
    }

    let (a, b) = (a.typed_cache::<T>()?, b.typed_cache::<T>()?);
    with_binary_op!(opcode, UNIT, |Op| boxed(CachedBinary::<T, Op> {
        dest: target,
        a,
        b,
        _op: PhantomData,
    }))
}

fn unary<T: Arith>(shape: Shape, operands: &[OperandInfo]) -> VmResult<BoxedOp> {
    let [dest, src] = fixed::<2>(Opcode::Neg, operands)?;
    match shape {
        Shape::CachedScalar => boxed(CachedUnary::<T, Neg> {
            dest: dest.typed_cache()?,
            src: src.typed_cache()?,
            _op: PhantomData,
        }),
        Shape::Scalar => boxed(ScalarUnary::<T, Neg> {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        }),
        Shape::Vector => boxed(VectorUnary::<T, Neg> {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        }),
        other => Err(unsupported(Category::Arithmetic, T::ELEMENT, other)),
    }
}

// =============================================================================
// Cached Scalar Nodes
// =============================================================================

struct CachedBinary<T: Arith, O> {
    dest: Cache<T>,
    a: Cache<T>,
    b: Cache<T>,
    _op: PhantomData<O>,
}

impl<T: Arith, O: BinaryOp<T>> Execute for CachedBinary<T, O> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(O::apply(self.a.get(), self.b.get())?);
        Ok(Flow::Next)
    }
}

struct CachedIncrement<T: Arith> {
    target: Cache<T>,
}

impl<T: Arith> Execute for CachedIncrement<T> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.set(T::add(self.target.get(), T::ONE)?);
        Ok(Flow::Next)
    }
}

struct CachedDecrement<T: Arith> {
    target: Cache<T>,
}

impl<T: Arith> Execute for CachedDecrement<T> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.set(T::sub(self.target.get(), T::ONE)?);
        Ok(Flow::Next)
    }
}

/// `x = x op c` with `c` read once at dispatch.
struct CachedConstant<T: Arith, O> {
    target: Cache<T>,
    constant: T,
    _op: PhantomData<O>,
}

impl<T: Arith, O: BinaryOp<T>> Execute for CachedConstant<T, O> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.set(O::apply(self.target.get(), self.constant)?);
        Ok(Flow::Next)
    }
}

struct CachedUnary<T: Arith, O> {
    dest: Cache<T>,
    src: Cache<T>,
    _op: PhantomData<O>,
}

impl<T: Arith, O: UnaryOp<T>> Execute for CachedUnary<T, O> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(O::apply(self.src.get()));
        Ok(Flow::Next)
    }
}

// =============================================================================
// Memory Nodes
// =============================================================================

struct ScalarBinary<T: Arith, O> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: BinaryOp<T>> Execute for ScalarBinary<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        self.dest.set(O::apply(self.a.get::<T>()?, self.b.get::<T>()?)?)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct VectorBinary<T: Arith, O> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: BinaryOp<T>> Execute for VectorBinary<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<T>()?;
        let a = self.a.view::<T>()?;
        let b = self.b.view::<T>()?;
        ensure_size(dest.len(), a.len())?;
        ensure_size(dest.len(), b.len())?;
        for ((d, a), b) in dest.cells().iter().zip(a.cells()).zip(b.cells()) {
            d.set(O::apply(a.get(), b.get())?);
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct ScalarUnary<T: Arith, O> {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: UnaryOp<T>> Execute for ScalarUnary<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        self.dest.set(O::apply(self.src.get::<T>()?))?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct VectorUnary<T: Arith, O> {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<(T, O)>,
}

impl<T: Arith, O: UnaryOp<T>> Execute for VectorUnary<T, O> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<T>()?;
        let src = self.src.view::<T>()?;
        ensure_size(dest.len(), src.len())?;
        for (d, s) in dest.cells().iter().zip(src.cells()) {
            d.set(O::apply(s.get()));
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

/// Two arithmetic kernels executed by one node.
struct Dual {
    first: BoxedOp,
    second: BoxedOp,
}

impl Execute for Dual {
    #[inline]
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.first.execute(ctx)?;
        self.second.execute(ctx)
    }
}
