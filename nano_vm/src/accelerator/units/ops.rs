//! Zero-sized operator types.
//!
//! Nodes are generic over an element type and one of these operators, so
//! every (operator, type) pair is a separate monomorphized kernel with no
//! branching on the opcode at run time.

use super::super::cache::CachedElement;
use crate::error::{RuntimeError, VmResult};
use nano_core::Opcode;

// =============================================================================
// Element Traits
// =============================================================================

/// Element type supporting arithmetic.
pub trait Arith: CachedElement + PartialOrd {
    /// Multiplicative identity.
    const ONE: Self;

    fn add(a: Self, b: Self) -> VmResult<Self>;
    fn sub(a: Self, b: Self) -> VmResult<Self>;
    fn mul(a: Self, b: Self) -> VmResult<Self>;
    fn div(a: Self, b: Self) -> VmResult<Self>;
    fn rem(a: Self, b: Self) -> VmResult<Self>;
    fn neg(a: Self) -> Self;
}

impl Arith for i64 {
    const ONE: Self = 1;

    #[inline(always)]
    fn add(a: Self, b: Self) -> VmResult<Self> {
        Ok(a.wrapping_add(b))
    }

    #[inline(always)]
    fn sub(a: Self, b: Self) -> VmResult<Self> {
        Ok(a.wrapping_sub(b))
    }

    #[inline(always)]
    fn mul(a: Self, b: Self) -> VmResult<Self> {
        Ok(a.wrapping_mul(b))
    }

    #[inline(always)]
    fn div(a: Self, b: Self) -> VmResult<Self> {
        if b == 0 {
            return Err(RuntimeError::division_by_zero());
        }
        Ok(a.wrapping_div(b))
    }

    #[inline(always)]
    fn rem(a: Self, b: Self) -> VmResult<Self> {
        if b == 0 {
            return Err(RuntimeError::division_by_zero());
        }
        Ok(a.wrapping_rem(b))
    }

    #[inline(always)]
    fn neg(a: Self) -> Self {
        a.wrapping_neg()
    }
}

impl Arith for f64 {
    const ONE: Self = 1.0;

    #[inline(always)]
    fn add(a: Self, b: Self) -> VmResult<Self> {
        Ok(a + b)
    }

    #[inline(always)]
    fn sub(a: Self, b: Self) -> VmResult<Self> {
        Ok(a - b)
    }

    #[inline(always)]
    fn mul(a: Self, b: Self) -> VmResult<Self> {
        Ok(a * b)
    }

    #[inline(always)]
    fn div(a: Self, b: Self) -> VmResult<Self> {
        Ok(a / b)
    }

    #[inline(always)]
    fn rem(a: Self, b: Self) -> VmResult<Self> {
        Ok(a % b)
    }

    #[inline(always)]
    fn neg(a: Self) -> Self {
        -a
    }
}

/// Value conversion used by MOV, FILL and CAST.
pub trait Convert<S>: Sized {
    fn convert(source: S) -> Self;
}

impl Convert<i64> for i64 {
    #[inline(always)]
    fn convert(source: i64) -> Self {
        source
    }
}

impl Convert<f64> for f64 {
    #[inline(always)]
    fn convert(source: f64) -> Self {
        source
    }
}

impl Convert<bool> for bool {
    #[inline(always)]
    fn convert(source: bool) -> Self {
        source
    }
}

impl Convert<i64> for f64 {
    #[inline(always)]
    #[allow(clippy::cast_precision_loss)]
    fn convert(source: i64) -> Self {
        source as f64
    }
}

impl Convert<f64> for i64 {
    // Truncates toward zero, saturates at the bounds, NaN becomes 0.
    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    fn convert(source: f64) -> Self {
        source as i64
    }
}

// =============================================================================
// Operators
// =============================================================================

/// Binary operator over `T`.
pub trait BinaryOp<T>: 'static {
    const OPCODE: Opcode;
    fn apply(a: T, b: T) -> VmResult<T>;
}

/// Unary operator over `T`.
pub trait UnaryOp<T>: 'static {
    const OPCODE: Opcode;
    fn apply(a: T) -> T;
}

/// Comparison of two `T`.
pub trait CompareOp<T>: 'static {
    const OPCODE: Opcode;
    fn apply(a: T, b: T) -> bool;
}

pub struct Add;
pub struct Sub;
pub struct Mul;
pub struct Div;
pub struct Rem;
pub struct Neg;

macro_rules! arith_op {
    ($op:ident, $opcode:ident, $method:ident) => {
        impl<T: Arith> BinaryOp<T> for $op {
            const OPCODE: Opcode = Opcode::$opcode;

            #[inline(always)]
            fn apply(a: T, b: T) -> VmResult<T> {
                T::$method(a, b)
            }
        }
    };
}

arith_op!(Add, Add, add);
arith_op!(Sub, Sub, sub);
arith_op!(Mul, Mul, mul);
arith_op!(Div, Div, div);
arith_op!(Rem, Rem, rem);

impl<T: Arith> UnaryOp<T> for Neg {
    const OPCODE: Opcode = Opcode::Neg;

    #[inline(always)]
    fn apply(a: T) -> T {
        T::neg(a)
    }
}

pub struct Eq;
pub struct Neq;
pub struct Gt;
pub struct Lt;
pub struct Geq;
pub struct Leq;

macro_rules! compare_op {
    ($op:ident, $opcode:ident, $cmp:tt) => {
        impl<T: PartialOrd + 'static> CompareOp<T> for $op {
            const OPCODE: Opcode = Opcode::$opcode;

            #[inline(always)]
            fn apply(a: T, b: T) -> bool {
                a $cmp b
            }
        }
    };
}

compare_op!(Eq, Eq, ==);
compare_op!(Neq, Neq, !=);
compare_op!(Gt, Gt, >);
compare_op!(Lt, Lt, <);
compare_op!(Geq, Geq, >=);
compare_op!(Leq, Leq, <=);

/// Logical NOT.
pub struct Not;

impl UnaryOp<bool> for Not {
    const OPCODE: Opcode = Opcode::Not;

    #[inline(always)]
    fn apply(a: bool) -> bool {
        !a
    }
}
