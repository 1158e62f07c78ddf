//! Memory cells.
//!
//! A [`DataContainer`] is one cell of VM memory: a typed backing array, an
//! offset into it, and a shape. Backing arrays are reference counted and
//! element-wise interior mutable, so several containers can alias one array
//! (this is how `REF`, `REFPOP` and `REFELM` work) and a write through any
//! alias is visible through all of them.
//!
//! Arrays are never resized in place. Reallocation installs a fresh array,
//! which leaves previous aliases pointing at the old storage.

use crate::data_type::DataType;
use crate::error::{DataError, DataResult};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Rank of a scalar.
pub const SCALAR_RANK: usize = 0;

/// Number of elements of a scalar.
pub const SCALAR_SIZE: usize = 1;

/// Shared, element-wise mutable backing array of a primitive type.
pub type Buffer<T> = Rc<[Cell<T>]>;

/// Shared backing array of strings.
pub type StringBuffer = Rc<[RefCell<String>]>;

/// Per-dimension lengths.
pub type Lengths = SmallVec<[usize; 4]>;

/// Shared handle to a container.
pub type ContainerRef = Rc<DataContainer>;

// =============================================================================
// Backing Arrays
// =============================================================================

/// Typed backing array of a container.
#[derive(Debug, Clone, Default)]
pub enum ArrayData {
    /// No array has been allocated yet.
    #[default]
    Unallocated,
    /// int64 elements.
    Int64(Buffer<i64>),
    /// float64 elements.
    Float64(Buffer<f64>),
    /// bool elements.
    Bool(Buffer<bool>),
    /// string elements.
    String(StringBuffer),
}

impl ArrayData {
    /// Allocate a zero-initialized array of `size` elements.
    pub fn allocate(data_type: DataType, size: usize) -> DataResult<Self> {
        Ok(match data_type {
            DataType::Int64 => Self::Int64(new_buffer(size)),
            DataType::Float64 => Self::Float64(new_buffer(size)),
            DataType::Bool => Self::Bool(new_buffer(size)),
            DataType::String => Self::String((0..size).map(|_| RefCell::default()).collect()),
            DataType::Void => return Err(DataError::UnallocatableType(data_type)),
        })
    }

    /// Element type, or `Void` when unallocated.
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Unallocated => DataType::Void,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
            Self::String(_) => DataType::String,
        }
    }

    /// Number of elements in the whole array.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Unallocated => 0,
            Self::Int64(b) => b.len(),
            Self::Float64(b) => b.len(),
            Self::Bool(b) => b.len(),
            Self::String(b) => b.len(),
        }
    }

    /// Whether the array has no elements (or does not exist).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an array exists at all.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        !matches!(self, Self::Unallocated)
    }

    /// Identity comparison of the underlying arrays.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Rc::ptr_eq(a, b),
            (Self::Float64(a), Self::Float64(b)) => Rc::ptr_eq(a, b),
            (Self::Bool(a), Self::Bool(b)) => Rc::ptr_eq(a, b),
            (Self::String(a), Self::String(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn new_buffer<T: Element>(size: usize) -> Buffer<T> {
    (0..size).map(|_| Cell::new(T::default())).collect()
}

/// Build a buffer from owned values.
pub fn buffer_from<T: Element>(values: impl IntoIterator<Item = T>) -> Buffer<T> {
    values.into_iter().map(Cell::new).collect()
}

// =============================================================================
// Element Types
// =============================================================================

/// Primitive element type that can live in a [`Buffer`].
pub trait Element: Copy + PartialEq + Default + fmt::Debug + 'static {
    /// Data type tag of this element type.
    const DATA_TYPE: DataType;

    /// Borrow the typed buffer out of `data`, if it has this element type.
    fn buffer(data: &ArrayData) -> Option<&Buffer<Self>>;

    /// Wrap a typed buffer.
    fn wrap(buffer: Buffer<Self>) -> ArrayData;
}

impl Element for i64 {
    const DATA_TYPE: DataType = DataType::Int64;

    #[inline(always)]
    fn buffer(data: &ArrayData) -> Option<&Buffer<Self>> {
        match data {
            ArrayData::Int64(b) => Some(b),
            _ => None,
        }
    }

    #[inline(always)]
    fn wrap(buffer: Buffer<Self>) -> ArrayData {
        ArrayData::Int64(buffer)
    }
}

impl Element for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    #[inline(always)]
    fn buffer(data: &ArrayData) -> Option<&Buffer<Self>> {
        match data {
            ArrayData::Float64(b) => Some(b),
            _ => None,
        }
    }

    #[inline(always)]
    fn wrap(buffer: Buffer<Self>) -> ArrayData {
        ArrayData::Float64(buffer)
    }
}

impl Element for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    #[inline(always)]
    fn buffer(data: &ArrayData) -> Option<&Buffer<Self>> {
        match data {
            ArrayData::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[inline(always)]
    fn wrap(buffer: Buffer<Self>) -> ArrayData {
        ArrayData::Bool(buffer)
    }
}

// =============================================================================
// Views
// =============================================================================

/// Window of `size` elements starting at a container's offset.
///
/// Holds its own reference to the backing array, so it stays valid even if
/// the container is re-pointed while the view is alive.
#[derive(Debug, Clone)]
pub struct View<T: Element> {
    buffer: Buffer<T>,
    offset: usize,
    size: usize,
}

impl<T: Element> View<T> {
    fn new(buffer: Buffer<T>, offset: usize, size: usize) -> DataResult<Self> {
        let end = offset + size;
        if end > buffer.len() {
            return Err(DataError::OffsetOutOfBounds {
                index: end.saturating_sub(1),
                length: buffer.len(),
            });
        }
        Ok(Self {
            buffer,
            offset,
            size,
        })
    }

    /// The viewed elements.
    #[inline(always)]
    #[must_use]
    pub fn cells(&self) -> &[Cell<T>] {
        &self.buffer[self.offset..self.offset + self.size]
    }

    /// Number of viewed elements.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the view is empty.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Copy the viewed elements out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.cells().iter().map(Cell::get).collect()
    }
}

// =============================================================================
// Data Container
// =============================================================================

#[derive(Debug, Clone)]
struct State {
    data: ArrayData,
    offset: usize,
    lengths: Lengths,
    size: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            data: ArrayData::Unallocated,
            offset: 0,
            lengths: Lengths::new(),
            size: SCALAR_SIZE,
        }
    }
}

/// One cell of VM memory.
#[derive(Debug, Default)]
pub struct DataContainer {
    state: RefCell<State>,
}

impl DataContainer {
    /// Create an unallocated, scalar-shaped container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scalar holding `value`.
    #[must_use]
    pub fn scalar<T: Element>(value: T) -> Self {
        let container = Self::new();
        container.set_array_data(T::wrap(buffer_from([value])), 0, &[]);
        container
    }

    /// Create a rank-1 array holding `values`.
    #[must_use]
    pub fn vector<T: Element>(values: Vec<T>) -> Self {
        let len = values.len();
        let container = Self::new();
        container.set_array_data(T::wrap(buffer_from(values)), 0, &[len]);
        container
    }

    /// Create an array of arbitrary shape, stored row-major.
    pub fn array<T: Element>(values: Vec<T>, lengths: &[usize]) -> DataResult<Self> {
        let size: usize = lengths.iter().product();
        if size != values.len() {
            return Err(DataError::SizeMismatch {
                expected: size,
                found: values.len(),
            });
        }
        let container = Self::new();
        container.set_array_data(T::wrap(buffer_from(values)), 0, lengths);
        Ok(container)
    }

    /// Create a scalar string.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        let container = Self::new();
        let buffer: StringBuffer = std::iter::once(RefCell::new(value.into())).collect();
        container.set_array_data(ArrayData::String(buffer), 0, &[]);
        container
    }

    /// Wrap into a shared handle.
    #[must_use]
    pub fn shared(self) -> ContainerRef {
        Rc::new(self)
    }

    // =========================================================================
    // Shape & Identity
    // =========================================================================

    /// Element type of the backing array.
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.state.borrow().data.data_type()
    }

    /// Number of dimensions; 0 for scalars.
    #[inline]
    #[must_use]
    pub fn rank(&self) -> usize {
        self.state.borrow().lengths.len()
    }

    /// Per-dimension lengths.
    #[must_use]
    pub fn lengths(&self) -> Lengths {
        self.state.borrow().lengths.clone()
    }

    /// Number of elements (product of the lengths, 1 for scalars).
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.borrow().size
    }

    /// Offset of the first element in the backing array.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.state.borrow().offset
    }

    /// Whether a backing array exists.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.state.borrow().data.is_allocated()
    }

    /// Whether the container has scalar shape.
    #[inline]
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.rank() == SCALAR_RANK
    }

    /// Shared handle to the backing array.
    #[must_use]
    pub fn data(&self) -> ArrayData {
        self.state.borrow().data.clone()
    }

    /// Whether both containers use the same backing array.
    #[must_use]
    pub fn shares_array_with(&self, other: &Self) -> bool {
        self.state.borrow().data.ptr_eq(&other.state.borrow().data)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Point this container at `data`, starting at `offset`, with shape `lengths`.
    pub fn set_array_data(&self, data: ArrayData, offset: usize, lengths: &[usize]) {
        let mut state = self.state.borrow_mut();
        state.data = data;
        state.offset = offset;
        state.lengths = Lengths::from_slice(lengths);
        state.size = lengths.iter().product();
    }

    /// Replace the shape, keeping the backing array.
    pub fn set_lengths(&self, lengths: &[usize]) {
        let mut state = self.state.borrow_mut();
        state.lengths = Lengths::from_slice(lengths);
        state.size = lengths.iter().product();
    }

    /// Alias every field of `other`.
    pub fn refer(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        let source = other.state.borrow().clone();
        *self.state.borrow_mut() = source;
    }

    /// Drop the backing array and return to the unallocated scalar state.
    pub fn initialize(&self) {
        *self.state.borrow_mut() = State::default();
    }

    /// Ensure a `data_type` array shaped `lengths` is installed.
    ///
    /// A new array is allocated only when the current one has a different
    /// type or element count; otherwise only the shape is updated. Returns
    /// whether a new array was installed.
    pub fn reallocate(&self, data_type: DataType, lengths: &[usize]) -> DataResult<bool> {
        let size: usize = lengths.iter().product();
        {
            let state = self.state.borrow();
            if state.data.data_type() == data_type
                && state.size == size
                && state.data.is_allocated()
            {
                drop(state);
                self.set_lengths(lengths);
                return Ok(false);
            }
        }
        self.set_array_data(ArrayData::allocate(data_type, size)?, 0, lengths);
        Ok(true)
    }

    // =========================================================================
    // Typed Access
    // =========================================================================

    fn mismatch<T: Element>(data: &ArrayData) -> DataError {
        DataError::TypeMismatch {
            expected: T::DATA_TYPE,
            found: data.data_type(),
        }
    }

    /// Read the element at the container's offset.
    #[inline]
    pub fn get<T: Element>(&self) -> DataResult<T> {
        self.get_at(0)
    }

    /// Read the element `index` positions past the container's offset.
    pub fn get_at<T: Element>(&self, index: usize) -> DataResult<T> {
        let state = self.state.borrow();
        let buffer = T::buffer(&state.data).ok_or_else(|| Self::mismatch::<T>(&state.data))?;
        let position = state.offset + index;
        buffer
            .get(position)
            .map(Cell::get)
            .ok_or(DataError::OffsetOutOfBounds {
                index: position,
                length: buffer.len(),
            })
    }

    /// Write the element at the container's offset.
    #[inline]
    pub fn set<T: Element>(&self, value: T) -> DataResult<()> {
        self.set_at(0, value)
    }

    /// Write the element `index` positions past the container's offset.
    pub fn set_at<T: Element>(&self, index: usize, value: T) -> DataResult<()> {
        let state = self.state.borrow();
        let buffer = T::buffer(&state.data).ok_or_else(|| Self::mismatch::<T>(&state.data))?;
        let position = state.offset + index;
        match buffer.get(position) {
            Some(cell) => {
                cell.set(value);
                Ok(())
            }
            None => Err(DataError::OffsetOutOfBounds {
                index: position,
                length: buffer.len(),
            }),
        }
    }

    /// View of this container's elements.
    pub fn view<T: Element>(&self) -> DataResult<View<T>> {
        let state = self.state.borrow();
        let buffer = T::buffer(&state.data).ok_or_else(|| Self::mismatch::<T>(&state.data))?;
        View::new(Rc::clone(buffer), state.offset, state.size)
    }

    /// Copy this container's elements out.
    pub fn to_vec<T: Element>(&self) -> DataResult<Vec<T>> {
        Ok(self.view::<T>()?.to_vec())
    }

    /// String backing array together with the container's offset and size.
    pub fn string_window(&self) -> DataResult<(StringBuffer, usize, usize)> {
        let state = self.state.borrow();
        match &state.data {
            ArrayData::String(buffer) => {
                if state.offset + state.size > buffer.len() {
                    return Err(DataError::OffsetOutOfBounds {
                        index: state.offset + state.size,
                        length: buffer.len(),
                    });
                }
                Ok((Rc::clone(buffer), state.offset, state.size))
            }
            other => Err(DataError::TypeMismatch {
                expected: DataType::String,
                found: other.data_type(),
            }),
        }
    }

    /// Read the string at the container's offset.
    pub fn get_string(&self) -> DataResult<String> {
        let (buffer, offset, _) = self.string_window()?;
        Ok(buffer[offset].borrow().clone())
    }

    /// Write the string at the container's offset.
    pub fn set_string(&self, value: impl Into<String>) -> DataResult<()> {
        let (buffer, offset, _) = self.string_window()?;
        *buffer[offset].borrow_mut() = value.into();
        Ok(())
    }
}
