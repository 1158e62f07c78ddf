//! Logical unit: ANDM ORM NOT over bool.
//!
//! The compiler may skip the code computing the right operand of ANDM/ORM
//! when the left operand already decides the result. The right operand is
//! therefore read only when the left one does not decide, and a right
//! operand that was never allocated counts as the neutral outcome.

use super::ops::{Not, UnaryOp};
use super::{BoxedOp, boxed, ensure_size, fixed, unsupported};
use crate::accelerator::cache::Cache;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::{AcceleratorInstruction, Category, ElementType, Shape};
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, Opcode};
use std::marker::PhantomData;
use std::rc::Rc;

const UNIT: &str = "logical unit";

/// Short-circuiting boolean connective.
trait Junction: 'static {
    /// Result when the right operand was never computed.
    const ELIDED: bool;

    /// Whether `left` alone decides the result (which is then `left`).
    fn decides(left: bool) -> bool;

    #[inline(always)]
    fn combine(left: bool, right: impl FnOnce() -> VmResult<bool>) -> VmResult<bool> {
        if Self::decides(left) { Ok(left) } else { right() }
    }
}

struct And;
struct Or;

impl Junction for And {
    const ELIDED: bool = false;

    #[inline(always)]
    fn decides(left: bool) -> bool {
        !left
    }
}

impl Junction for Or {
    const ELIDED: bool = true;

    #[inline(always)]
    fn decides(left: bool) -> bool {
        left
    }
}

/// Build the node for a logical instruction.
pub fn generate(
    instruction: &AcceleratorInstruction,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    match instruction.opcode() {
        Opcode::Andm => junction::<And>(Opcode::Andm, shape, operands),
        Opcode::Orm => junction::<Or>(Opcode::Orm, shape, operands),
        Opcode::Not => not(shape, operands),
        other => Err(RuntimeError::invalid_opcode(other, UNIT)),
    }
}

fn junction<J: Junction>(
    opcode: Opcode,
    shape: Shape,
    operands: &[OperandInfo],
) -> VmResult<BoxedOp> {
    let [dest, a, b] = fixed::<3>(opcode, operands)?;
    match shape {
        Shape::CachedScalar => boxed(CachedJunction::<J> {
            dest: dest.typed_cache()?,
            a: a.typed_cache()?,
            b: b.typed_cache()?,
            _op: PhantomData,
        }),
        Shape::Scalar => boxed(ScalarJunction::<J> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        }),
        Shape::Vector => boxed(VectorJunction::<J> {
            dest: Rc::clone(dest.container()),
            a: Rc::clone(a.container()),
            b: Rc::clone(b.container()),
            sync: Synchronizer::new(operands),
            _op: PhantomData,
        }),
        other => Err(unsupported(Category::Logical, ElementType::Bool, other)),
    }
}

fn not(shape: Shape, operands: &[OperandInfo]) -> VmResult<BoxedOp> {
    let [dest, src] = fixed::<2>(Opcode::Not, operands)?;
    match shape {
        Shape::CachedScalar => boxed(CachedNot {
            dest: dest.typed_cache()?,
            src: src.typed_cache()?,
        }),
        Shape::Scalar | Shape::Vector => boxed(MemoryNot {
            dest: Rc::clone(dest.container()),
            src: Rc::clone(src.container()),
            sync: Synchronizer::new(operands),
        }),
        other => Err(unsupported(Category::Logical, ElementType::Bool, other)),
    }
}

struct CachedJunction<J> {
    dest: Cache<bool>,
    a: Cache<bool>,
    b: Cache<bool>,
    _op: PhantomData<J>,
}

impl<J: Junction> Execute for CachedJunction<J> {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(J::combine(self.a.get(), || Ok(self.b.get()))?);
        Ok(Flow::Next)
    }
}

struct ScalarJunction<J> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<J>,
}

impl<J: Junction> Execute for ScalarJunction<J> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let value = J::combine(self.a.get()?, || {
            if self.b.is_allocated() {
                Ok(self.b.get()?)
            } else {
                Ok(J::ELIDED)
            }
        })?;
        self.dest.set(value)?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct VectorJunction<J> {
    dest: ContainerRef,
    a: ContainerRef,
    b: ContainerRef,
    sync: Synchronizer,
    _op: PhantomData<J>,
}

impl<J: Junction> Execute for VectorJunction<J> {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<bool>()?;
        if self.b.is_allocated() {
            let a = self.a.view::<bool>()?;
            let b = self.b.view::<bool>()?;
            ensure_size(dest.len(), a.len())?;
            ensure_size(dest.len(), b.len())?;
            for ((d, a), b) in dest.cells().iter().zip(a.cells()).zip(b.cells()) {
                d.set(J::combine(a.get(), || Ok(b.get()))?);
            }
        } else {
            for d in dest.cells() {
                d.set(J::ELIDED);
            }
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

struct CachedNot {
    dest: Cache<bool>,
    src: Cache<bool>,
}

impl Execute for CachedNot {
    #[inline]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.dest.set(Not::apply(self.src.get()));
        Ok(Flow::Next)
    }
}

/// NOT through memory; a scalar is a one-element vector here.
struct MemoryNot {
    dest: ContainerRef,
    src: ContainerRef,
    sync: Synchronizer,
}

impl Execute for MemoryNot {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.sync.to_memory()?;
        let dest = self.dest.view::<bool>()?;
        let src = self.src.view::<bool>()?;
        ensure_size(dest.len(), src.len())?;
        for (d, s) in dest.cells().iter().zip(src.cells()) {
            d.set(Not::apply(s.get()));
        }
        self.sync.to_cache()?;
        Ok(Flow::Next)
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
                &[OperandRef::register(0), OperandRef::register(1), OperandRef::register(2)],
            ),
            0,
        )
    }

    fn unset_right(opcode: Opcode, shape: Shape, left: bool) -> Vec<bool> {
        let dest = memory_operand(DataContainer::vector(vec![!left; 2]));
        let left = memory_operand(DataContainer::vector(vec![left; 2]));
        let right = memory_operand(DataContainer::new());
        let ops = [dest.clone(), left, right];
        let node = generate(&instruction(opcode), shape, &ops).unwrap();
        run_op(&*node).unwrap();
        dest.container().to_vec::<bool>().unwrap()
    }

    #[test]
    fn test_vector_unset_right_operand() {
        assert_eq!(unset_right(Opcode::Andm, Shape::Vector, true), vec![false, false]);
        assert_eq!(unset_right(Opcode::Orm, Shape::Vector, false), vec![true, true]);
    }

    #[test]
    fn test_scalar_unset_right_operand() {
        for (opcode, left, expected) in [(Opcode::Andm, true, false), (Opcode::Orm, false, true)] {
            let dest = memory_operand(DataContainer::scalar(!expected));
            let ops = [
                dest.clone(),
                memory_operand(DataContainer::scalar(left)),
                memory_operand(DataContainer::new()),
            ];
            let node = generate(&instruction(opcode), Shape::Scalar, &ops).unwrap();
            run_op(&*node).unwrap();
            assert_eq!(dest.container().get::<bool>(), Ok(expected));
        }
    }

    #[test]
    fn test_scalar_short_circuit_skips_right() {
        // Right operand holds a non-bool; reading it would fail.
        let dest = memory_operand(DataContainer::scalar(true));
        let ops = [
            dest.clone(),
            memory_operand(DataContainer::scalar(false)),
            memory_operand(DataContainer::scalar(5_i64)),
        ];
        let node = generate(&instruction(Opcode::Andm), Shape::Scalar, &ops).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(dest.container().get::<bool>(), Ok(false));
    }

    #[test]
    fn test_cached_forms() {
        let ops = [
            cached_operand(false, false),
            cached_operand(false, false),
            cached_operand(true, false),
        ];
        let node = generate(&instruction(Opcode::Orm), Shape::CachedScalar, &ops).unwrap();
        run_op(&*node).unwrap();
        assert!(ops[0].typed_cache::<bool>().unwrap().get());

        let ops = [cached_operand(false, false), cached_operand(false, false)];
        let node = generate(&instruction(Opcode::Not), Shape::CachedScalar, &ops).unwrap();
        run_op(&*node).unwrap();
        assert!(ops[0].typed_cache::<bool>().unwrap().get());
    }

    #[test]
    fn test_vector_elementwise() {
        let dest = memory_operand(DataContainer::vector(vec![false; 4]));
        let ops = [
            dest.clone(),
            memory_operand(DataContainer::vector(vec![true, true, false, false])),
            memory_operand(DataContainer::vector(vec![true, false, true, false])),
        ];
        let node = generate(&instruction(Opcode::Andm), Shape::Vector, &ops).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(dest.container().to_vec::<bool>().unwrap(), vec![true, false, false, false]);
    }
}
