//! Scalar caches.
//!
//! A cache is a single mutable value mirroring one scalar memory cell. Every
//! node that touches the operand holds a handle to the same cache, so the
//! fully cached node variants never go through a container at all. Cache and
//! cell are reconciled explicitly with [`ScalarCache::to_memory`] and
//! [`ScalarCache::to_cache`].

use super::instruction::ElementType;
use nano_core::{DataContainer, DataResult, DataType, Element};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Shared mutable scalar of element type `T`.
#[derive(Clone, Default)]
pub struct Cache<T: Element>(Rc<Cell<T>>);

impl<T: Element> Cache<T> {
    /// Create a cache holding `value`.
    #[inline]
    pub fn new(value: T) -> Self {
        Self(Rc::new(Cell::new(value)))
    }

    /// Current value.
    #[inline(always)]
    pub fn get(&self) -> T {
        self.0.get()
    }

    /// Overwrite the value.
    #[inline(always)]
    pub fn set(&self, value: T) {
        self.0.set(value);
    }

    /// Whether both handles refer to the same cache.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A new, unshared cache holding the current value.
    #[inline]
    pub fn detached(&self) -> Self {
        Self::new(self.get())
    }
}

impl<T: Element> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cache({:?})", self.get())
    }
}

/// Cache of one operand, tagged by element type.
#[derive(Debug, Clone)]
pub enum ScalarCache {
    /// int64 cache.
    Int64(Cache<i64>),
    /// float64 cache.
    Float64(Cache<f64>),
    /// bool cache.
    Bool(Cache<bool>),
    /// Placeholder cache of the NONE partition; synchronizing it does nothing.
    Void,
}

impl ScalarCache {
    /// Fresh zeroed cache for `data_type`, if that type is cacheable.
    pub fn new(data_type: DataType) -> Option<Self> {
        match data_type {
            DataType::Int64 => Some(Self::Int64(Cache::default())),
            DataType::Float64 => Some(Self::Float64(Cache::default())),
            DataType::Bool => Some(Self::Bool(Cache::default())),
            DataType::String | DataType::Void => None,
        }
    }

    /// Element type of the cache.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
            Self::Void => DataType::Void,
        }
    }

    /// Whether this is the placeholder cache.
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Write the cached value into `container`.
    ///
    /// A container that holds no data yet is left untouched.
    #[inline]
    pub fn to_memory(&self, container: &DataContainer) -> DataResult<()> {
        if !container.is_allocated() {
            return Ok(());
        }
        match self {
            Self::Int64(cache) => container.set(cache.get()),
            Self::Float64(cache) => container.set(cache.get()),
            Self::Bool(cache) => container.set(cache.get()),
            Self::Void => Ok(()),
        }
    }

    /// Load the value of `container` into the cache.
    ///
    /// A container that holds no data yet leaves the cache unchanged.
    #[inline]
    pub fn to_cache(&self, container: &DataContainer) -> DataResult<()> {
        if !container.is_allocated() {
            return Ok(());
        }
        match self {
            Self::Int64(cache) => cache.set(container.get()?),
            Self::Float64(cache) => cache.set(container.get()?),
            Self::Bool(cache) => cache.set(container.get()?),
            Self::Void => {}
        }
        Ok(())
    }

    /// A new, unshared cache holding the current value.
    #[must_use]
    pub fn detached(&self) -> Self {
        match self {
            Self::Int64(cache) => Self::Int64(cache.detached()),
            Self::Float64(cache) => Self::Float64(cache.detached()),
            Self::Bool(cache) => Self::Bool(cache.detached()),
            Self::Void => Self::Void,
        }
    }

    /// Whether both handles refer to the same cache.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a.ptr_eq(b),
            (Self::Float64(a), Self::Float64(b)) => a.ptr_eq(b),
            (Self::Bool(a), Self::Bool(b)) => a.ptr_eq(b),
            (Self::Void, Self::Void) => true,
            _ => false,
        }
    }

    /// Typed cache, if the element type is `T`.
    #[inline]
    pub fn typed<T: CachedElement>(&self) -> Option<&Cache<T>> {
        T::cache_of(self)
    }
}

/// Element type with a [`ScalarCache`] variant.
pub trait CachedElement: Element {
    /// Element type tag used in acceleration types.
    const ELEMENT: ElementType;

    /// Borrow the typed cache out of `cache`.
    fn cache_of(cache: &ScalarCache) -> Option<&Cache<Self>>;

    /// Tag a typed cache.
    fn tag(cache: Cache<Self>) -> ScalarCache;
}

impl CachedElement for i64 {
    const ELEMENT: ElementType = ElementType::Int64;

    #[inline(always)]
    fn cache_of(cache: &ScalarCache) -> Option<&Cache<Self>> {
        match cache {
            ScalarCache::Int64(c) => Some(c),
            _ => None,
        }
    }

    #[inline(always)]
    fn tag(cache: Cache<Self>) -> ScalarCache {
        ScalarCache::Int64(cache)
    }
}

impl CachedElement for f64 {
    const ELEMENT: ElementType = ElementType::Float64;

    #[inline(always)]
    fn cache_of(cache: &ScalarCache) -> Option<&Cache<Self>> {
        match cache {
            ScalarCache::Float64(c) => Some(c),
            _ => None,
        }
    }

    #[inline(always)]
    fn tag(cache: Cache<Self>) -> ScalarCache {
        ScalarCache::Float64(cache)
    }
}

impl CachedElement for bool {
    const ELEMENT: ElementType = ElementType::Bool;

    #[inline(always)]
    fn cache_of(cache: &ScalarCache) -> Option<&Cache<Self>> {
        match cache {
            ScalarCache::Bool(c) => Some(c),
            _ => None,
        }
    }

    #[inline(always)]
    fn tag(cache: Cache<Self>) -> ScalarCache {
        ScalarCache::Bool(cache)
    }
}
