//! Dynamically typed instruction semantics.
//!
//! Every handler looks at the operand data type at run time and works on
//! whole containers, element by element. The accelerated units must agree
//! with these results on identical state.

use crate::accelerator::units::allocation::read_lengths;
use crate::accelerator::units::ensure_size;
use crate::accelerator::units::ops::{Arith, Convert};
use crate::accelerator::units::subscript::flatten;
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataContainer, DataError, DataType, Element, Opcode};

const UNIT: &str = "generic processor";

/// Error for an operator applied to a type it is not defined on.
fn undefined(opcode: Opcode, data_type: DataType) -> RuntimeError {
    RuntimeError::internal(format!("{opcode} is not defined for {data_type}"))
}

// =============================================================================
// Element-wise Helpers
// =============================================================================

#[inline]
fn map<A: Element, R: Element>(
    dest: &DataContainer,
    a: &DataContainer,
    f: impl Fn(A) -> VmResult<R>,
) -> VmResult<()> {
    let (dest, a) = (dest.view::<R>()?, a.view::<A>()?);
    ensure_size(dest.len(), a.len())?;
    for (d, a) in dest.cells().iter().zip(a.cells()) {
        d.set(f(a.get())?);
    }
    Ok(())
}

#[inline]
fn zip<A: Element, R: Element>(
    dest: &DataContainer,
    a: &DataContainer,
    b: &DataContainer,
    f: impl Fn(A, A) -> VmResult<R>,
) -> VmResult<()> {
    let (dest, a, b) = (dest.view::<R>()?, a.view::<A>()?, b.view::<A>()?);
    ensure_size(dest.len(), a.len())?;
    ensure_size(dest.len(), b.len())?;
    for ((d, a), b) in dest.cells().iter().zip(a.cells()).zip(b.cells()) {
        d.set(f(a.get(), b.get())?);
    }
    Ok(())
}

/// Apply `f` to every string of `src`, writing into `dest` of element type `R`.
fn map_strings<R: Element>(
    dest: &DataContainer,
    src: &DataContainer,
    f: impl Fn(&str) -> VmResult<R>,
) -> VmResult<()> {
    let dest = dest.view::<R>()?;
    let (buffer, offset, size) = src.string_window()?;
    ensure_size(dest.len(), size)?;
    for (i, d) in dest.cells().iter().enumerate() {
        d.set(f(&buffer[offset + i].borrow())?);
    }
    Ok(())
}

/// Render every element of `src` into the strings of `dest`.
fn format_into<S: Element>(
    dest: &DataContainer,
    src: &DataContainer,
    f: impl Fn(S) -> String,
) -> VmResult<()> {
    let src = src.view::<S>()?;
    let (buffer, offset, size) = dest.string_window()?;
    ensure_size(size, src.len())?;
    for (i, s) in src.cells().iter().enumerate() {
        *buffer[offset + i].borrow_mut() = f(s.get());
    }
    Ok(())
}

fn copy_strings(dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    let (dest_buffer, dest_offset, size) = dest.string_window()?;
    let (src_buffer, src_offset, src_size) = src.string_window()?;
    ensure_size(size, src_size)?;
    for i in 0..size {
        let value = src_buffer[src_offset + i].borrow().clone();
        *dest_buffer[dest_offset + i].borrow_mut() = value;
    }
    Ok(())
}

/// Sizes must agree; a scalar destination reports the oversized source.
fn check_assignable(dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    let (expected, found) = (dest.size(), src.size());
    if expected == found {
        return Ok(());
    }
    if dest.is_scalar() {
        return Err(RuntimeError::array_too_large_for_scalar(found));
    }
    Err(DataError::SizeMismatch { expected, found }.into())
}

// =============================================================================
// Arithmetic
// =============================================================================

fn binary_kernel<T: Arith>(opcode: Opcode) -> VmResult<fn(T, T) -> VmResult<T>> {
    let kernel: fn(T, T) -> VmResult<T> = match opcode {
        Opcode::Add => T::add,
        Opcode::Sub => T::sub,
        Opcode::Mul => T::mul,
        Opcode::Div => T::div,
        Opcode::Rem => T::rem,
        other => return Err(RuntimeError::invalid_opcode(other, UNIT)),
    };
    Ok(kernel)
}

/// ADD SUB MUL DIV REM; string ADD concatenates.
pub fn arithmetic(
    opcode: Opcode,
    data_type: DataType,
    dest: &DataContainer,
    a: &DataContainer,
    b: &DataContainer,
) -> VmResult<()> {
    match data_type {
        DataType::Int64 => zip::<i64, i64>(dest, a, b, binary_kernel(opcode)?),
        DataType::Float64 => zip::<f64, f64>(dest, a, b, binary_kernel(opcode)?),
        DataType::String if opcode == Opcode::Add => concat(dest, a, b),
        other => Err(undefined(opcode, other)),
    }
}

fn concat(dest: &DataContainer, a: &DataContainer, b: &DataContainer) -> VmResult<()> {
    let (dest_buffer, dest_offset, size) = dest.string_window()?;
    let (a_buffer, a_offset, a_size) = a.string_window()?;
    let (b_buffer, b_offset, b_size) = b.string_window()?;
    ensure_size(size, a_size)?;
    ensure_size(size, b_size)?;
    for i in 0..size {
        let value = format!(
            "{}{}",
            a_buffer[a_offset + i].borrow(),
            b_buffer[b_offset + i].borrow()
        );
        *dest_buffer[dest_offset + i].borrow_mut() = value;
    }
    Ok(())
}

/// NEG.
pub fn neg(data_type: DataType, dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    match data_type {
        DataType::Int64 => map::<i64, i64>(dest, src, |a| Ok(Arith::neg(a))),
        DataType::Float64 => map::<f64, f64>(dest, src, |a| Ok(Arith::neg(a))),
        other => Err(undefined(Opcode::Neg, other)),
    }
}

// =============================================================================
// Comparison
// =============================================================================

fn ordering<T: PartialOrd>(opcode: Opcode) -> VmResult<fn(T, T) -> VmResult<bool>> {
    let kernel: fn(T, T) -> VmResult<bool> = match opcode {
        Opcode::Eq => |a, b| Ok(a == b),
        Opcode::Neq => |a, b| Ok(a != b),
        Opcode::Gt => |a, b| Ok(a > b),
        Opcode::Lt => |a, b| Ok(a < b),
        Opcode::Geq => |a, b| Ok(a >= b),
        Opcode::Leq => |a, b| Ok(a <= b),
        other => return Err(RuntimeError::invalid_opcode(other, UNIT)),
    };
    Ok(kernel)
}

/// Whether EQ (true) or NEQ (false); other comparisons are undefined on `data_type`.
fn equality(opcode: Opcode, data_type: DataType) -> VmResult<bool> {
    match opcode {
        Opcode::Eq => Ok(true),
        Opcode::Neq => Ok(false),
        other => Err(undefined(other, data_type)),
    }
}

/// EQ NEQ GT LT GEQ LEQ; `data_type` is the type of the inputs.
pub fn compare(
    opcode: Opcode,
    data_type: DataType,
    dest: &DataContainer,
    a: &DataContainer,
    b: &DataContainer,
) -> VmResult<()> {
    match data_type {
        DataType::Int64 => zip::<i64, bool>(dest, a, b, ordering(opcode)?),
        DataType::Float64 => zip::<f64, bool>(dest, a, b, ordering(opcode)?),
        DataType::Bool => {
            let equal = equality(opcode, data_type)?;
            zip::<bool, bool>(dest, a, b, move |a, b| Ok((a == b) == equal))
        }
        DataType::String => {
            let equal = equality(opcode, data_type)?;
            let out = dest.view::<bool>()?;
            let (a_buffer, a_offset, a_size) = a.string_window()?;
            let (b_buffer, b_offset, b_size) = b.string_window()?;
            ensure_size(out.len(), a_size)?;
            ensure_size(out.len(), b_size)?;
            for (i, d) in out.cells().iter().enumerate() {
                let same = *a_buffer[a_offset + i].borrow() == *b_buffer[b_offset + i].borrow();
                d.set(same == equal);
            }
            Ok(())
        }
        DataType::Void => Err(undefined(opcode, data_type)),
    }
}

// =============================================================================
// Logical
// =============================================================================

/// ANDM ORM with left short-circuit; an unallocated right side is elided.
pub fn logical(
    opcode: Opcode,
    dest: &DataContainer,
    a: &DataContainer,
    b: &DataContainer,
) -> VmResult<()> {
    // Value of the left side that decides the result on its own.
    let decisive = match opcode {
        Opcode::Andm => false,
        Opcode::Orm => true,
        other => return Err(RuntimeError::invalid_opcode(other, UNIT)),
    };
    let (out, left) = (dest.view::<bool>()?, a.view::<bool>()?);
    ensure_size(out.len(), left.len())?;
    if !b.is_allocated() {
        for d in out.cells() {
            d.set(decisive);
        }
        return Ok(());
    }
    let right = b.view::<bool>()?;
    ensure_size(out.len(), right.len())?;
    for ((d, l), r) in out.cells().iter().zip(left.cells()).zip(right.cells()) {
        let l = l.get();
        d.set(if l == decisive { l } else { r.get() });
    }
    Ok(())
}

/// NOT.
pub fn not(dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    map::<bool, bool>(dest, src, |a| Ok(!a))
}

// =============================================================================
// Transfer
// =============================================================================

/// MOV: value copy of equal-sized containers of any type.
pub fn mov(data_type: DataType, dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    check_assignable(dest, src)?;
    match data_type {
        DataType::Int64 => map::<i64, i64>(dest, src, Ok),
        DataType::Float64 => map::<f64, f64>(dest, src, Ok),
        DataType::Bool => map::<bool, bool>(dest, src, Ok),
        DataType::String => copy_strings(dest, src),
        DataType::Void => Err(undefined(Opcode::Mov, data_type)),
    }
}

/// REF: `dest` aliases every field of `src`.
pub fn refer(dest: &DataContainer, src: &DataContainer) {
    dest.refer(src);
}

/// FILL: broadcast the scalar `src` into every element of `dest`.
pub fn fill(data_type: DataType, dest: &DataContainer, src: &DataContainer) -> VmResult<()> {
    match data_type {
        DataType::Int64 => broadcast(dest, src.get::<i64>()?),
        DataType::Float64 => broadcast(dest, src.get::<f64>()?),
        DataType::Bool => broadcast(dest, src.get::<bool>()?),
        DataType::String => {
            let value = src.get_string()?;
            let (buffer, offset, size) = dest.string_window()?;
            for cell in &buffer[offset..offset + size] {
                *cell.borrow_mut() = value.clone();
            }
            Ok(())
        }
        DataType::Void => Err(undefined(Opcode::Fill, data_type)),
    }
}

fn broadcast<T: Element>(dest: &DataContainer, value: T) -> VmResult<()> {
    for d in dest.view::<T>()?.cells() {
        d.set(value);
    }
    Ok(())
}

fn parse_int(text: &str) -> VmResult<i64> {
    if let Ok(value) = text.parse::<i64>() {
        return Ok(value);
    }
    text.parse::<f64>()
        .map(<i64 as Convert<f64>>::convert)
        .map_err(|_| RuntimeError::cast_failed(text, DataType::Int64))
}

fn parse_float(text: &str) -> VmResult<f64> {
    text.parse::<f64>()
        .map_err(|_| RuntimeError::cast_failed(text, DataType::Float64))
}

fn parse_bool(text: &str) -> VmResult<bool> {
    match text {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RuntimeError::cast_failed(text, DataType::Bool)),
    }
}

/// CAST from `src_type` to `dest_type`.
///
/// Strings parse strictly: an int64 target also accepts a float literal,
/// truncated toward zero, and a bool target accepts only `true` and `false`.
pub fn cast(
    dest_type: DataType,
    src_type: DataType,
    dest: &DataContainer,
    src: &DataContainer,
) -> VmResult<()> {
    match (dest_type, src_type) {
        (DataType::Int64, DataType::Int64) => map::<i64, i64>(dest, src, Ok),
        (DataType::Int64, DataType::Float64) => {
            map::<f64, i64>(dest, src, |s| Ok(Convert::convert(s)))
        }
        (DataType::Int64, DataType::String) => map_strings(dest, src, parse_int),
        (DataType::Float64, DataType::Float64) => map::<f64, f64>(dest, src, Ok),
        (DataType::Float64, DataType::Int64) => {
            map::<i64, f64>(dest, src, |s| Ok(Convert::convert(s)))
        }
        (DataType::Float64, DataType::String) => map_strings(dest, src, parse_float),
        (DataType::Bool, DataType::Bool) => map::<bool, bool>(dest, src, Ok),
        (DataType::Bool, DataType::String) => map_strings(dest, src, parse_bool),
        (DataType::String, DataType::Int64) => format_into::<i64>(dest, src, |s| s.to_string()),
        (DataType::String, DataType::Float64) => {
            format_into::<f64>(dest, src, |s| format!("{s:?}"))
        }
        (DataType::String, DataType::Bool) => format_into::<bool>(dest, src, |s| s.to_string()),
        (DataType::String, DataType::String) => copy_strings(dest, src),
        _ => Err(RuntimeError::cast_failed(src_type.name(), dest_type)),
    }
}

// =============================================================================
// Allocation
// =============================================================================

/// ALLOC without lengths: scalar of `data_type`.
pub fn alloc_scalar(data_type: DataType, dest: &DataContainer) -> VmResult<()> {
    dest.reallocate(data_type, &[])?;
    Ok(())
}

/// ALLOC with lengths held in int64 scalars.
pub fn alloc_vector(
    data_type: DataType,
    dest: &DataContainer,
    lengths: &[ContainerRef],
) -> VmResult<()> {
    dest.reallocate(data_type, &read_lengths(lengths)?)?;
    Ok(())
}

/// ALLOCR / ALLOCP: the shape of `source`.
pub fn alloc_same_lengths(
    data_type: DataType,
    dest: &DataContainer,
    source: &DataContainer,
) -> VmResult<()> {
    dest.reallocate(data_type, &source.lengths())?;
    Ok(())
}

// =============================================================================
// Subscript
// =============================================================================

fn element_position(src: &DataContainer, indices: &[ContainerRef]) -> VmResult<usize> {
    let values = indices
        .iter()
        .map(|index| index.get::<i64>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(flatten(&src.lengths(), &values)?)
}

/// MOVELM: copy one element of `src`, at any rank, into the scalar `dest`.
pub fn move_element(
    data_type: DataType,
    dest: &DataContainer,
    src: &DataContainer,
    indices: &[ContainerRef],
) -> VmResult<()> {
    let position = element_position(src, indices)?;
    match data_type {
        DataType::Int64 => dest.set(src.get_at::<i64>(position)?)?,
        DataType::Float64 => dest.set(src.get_at::<f64>(position)?)?,
        DataType::Bool => dest.set(src.get_at::<bool>(position)?)?,
        DataType::String => {
            let (buffer, offset, _) = src.string_window()?;
            let index = offset + position;
            let value = buffer
                .get(index)
                .ok_or(DataError::OffsetOutOfBounds {
                    index,
                    length: buffer.len(),
                })?
                .borrow()
                .clone();
            dest.set_string(value)?;
        }
        DataType::Void => return Err(undefined(Opcode::Movelm, data_type)),
    }
    Ok(())
}

/// REFELM: re-point `dest` at one element of `src`.
pub fn refer_element(
    dest: &DataContainer,
    src: &DataContainer,
    indices: &[ContainerRef],
) -> VmResult<()> {
    let position = element_position(src, indices)?;
    dest.set_array_data(src.data(), src.offset() + position, &[]);
    Ok(())
}

// =============================================================================
// Control
// =============================================================================

/// Whether a JMP (`jump_on` true) or JMPN (false) on `condition` is taken.
pub fn jump_taken(condition: &DataContainer, jump_on: bool) -> VmResult<bool> {
    Ok(condition.view::<bool>()?.cells().iter().all(|c| c.get() == jump_on))
}
