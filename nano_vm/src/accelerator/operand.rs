//! Resolved operands and cache synchronization.

use super::cache::{Cache, CachedElement, ScalarCache};
use crate::error::{RuntimeError, VmResult};
use nano_core::{ContainerRef, DataResult};
use smallvec::SmallVec;

/// Where an operand's value is read and written.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Through the container only.
    Memory(ContainerRef),
    /// Through a cache mirroring the container.
    Cached(ContainerRef, ScalarCache),
}

/// One resolved operand of an instruction.
#[derive(Debug, Clone)]
pub struct OperandInfo {
    /// Container or cache handle.
    pub handle: Operand,
    /// Whether the operand is known to stay scalar.
    pub scalar: bool,
    /// Whether the operand lives in the CONSTANT partition.
    pub constant: bool,
}

impl OperandInfo {
    /// Backing container.
    #[inline]
    pub fn container(&self) -> &ContainerRef {
        match &self.handle {
            Operand::Memory(container) | Operand::Cached(container, _) => container,
        }
    }

    /// Cache, if the operand has one.
    #[inline]
    pub fn cache(&self) -> Option<&ScalarCache> {
        match &self.handle {
            Operand::Memory(_) => None,
            Operand::Cached(_, cache) => Some(cache),
        }
    }

    /// Whether the operand has a cache.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self.handle, Operand::Cached(..))
    }

    /// Whether the operand is a scalar with a cache.
    #[inline]
    pub fn is_cached_scalar(&self) -> bool {
        self.scalar && self.is_cached()
    }

    /// Typed cache; fails if the operand has no cache of element type `T`.
    pub fn typed_cache<T: CachedElement>(&self) -> VmResult<Cache<T>> {
        self.cache()
            .and_then(|cache| cache.typed::<T>())
            .cloned()
            .ok_or_else(|| RuntimeError::internal(format!("operand has no {} cache", T::DATA_TYPE)))
    }
}

/// Bidirectional copy between the caches and containers of one operand tuple.
///
/// Only operands that have a cache are bound; the rest are skipped.
#[derive(Debug, Clone, Default)]
pub struct Synchronizer {
    slots: SmallVec<[(ContainerRef, ScalarCache); 4]>,
}

impl Synchronizer {
    /// Bind every cached operand.
    pub fn new(operands: &[OperandInfo]) -> Self {
        Self::excluding(operands, &[])
    }

    /// Bind every cached operand except those at `skipped` indices.
    pub fn excluding(operands: &[OperandInfo], skipped: &[usize]) -> Self {
        let slots = operands
            .iter()
            .enumerate()
            .filter(|(i, _)| !skipped.contains(i))
            .filter_map(|(_, operand)| match &operand.handle {
                Operand::Cached(container, cache) if !cache.is_void() => {
                    Some((ContainerRef::clone(container), cache.clone()))
                }
                _ => None,
            })
            .collect();
        Self { slots }
    }

    /// Write every bound cache into its container.
    #[inline]
    pub fn to_memory(&self) -> DataResult<()> {
        for (container, cache) in &self.slots {
            cache.to_memory(container)?;
        }
        Ok(())
    }

    /// Reload every bound cache from its container.
    #[inline]
    pub fn to_cache(&self) -> DataResult<()> {
        for (container, cache) in &self.slots {
            cache.to_cache(container)?;
        }
        Ok(())
    }

    /// Whether no operand is bound.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of bound operands.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nano_core::{DataContainer, DataType};

    fn cached(value: i64) -> OperandInfo {
        let container = DataContainer::scalar(value).shared();
        let cache = ScalarCache::new(DataType::Int64).unwrap();
        cache.to_cache(&container).unwrap();
        OperandInfo {
            handle: Operand::Cached(container, cache),
            scalar: true,
            constant: false,
        }
    }

    fn memory(value: i64) -> OperandInfo {
        OperandInfo {
            handle: Operand::Memory(DataContainer::scalar(value).shared()),
            scalar: true,
            constant: false,
        }
    }

    #[test]
    fn test_only_cached_operands_bound() {
        let operands = [cached(1), memory(2), cached(3)];
        assert_eq!(Synchronizer::new(&operands).len(), 2);
        assert_eq!(Synchronizer::excluding(&operands, &[0]).len(), 1);
    }

    #[test]
    fn test_sync_makes_cache_and_memory_equal() {
        let operands = [cached(1), cached(2)];
        let sync = Synchronizer::new(&operands);
        operands[0].typed_cache::<i64>().unwrap().set(10);
        operands[1].container().set(20_i64).unwrap();
        sync.to_memory().unwrap();
        assert_eq!(operands[0].container().get::<i64>(), Ok(10));
        operands[1].container().set(20_i64).unwrap();
        sync.to_cache().unwrap();
        for operand in &operands {
            let cache = operand.typed_cache::<i64>().unwrap().get();
            assert_eq!(operand.container().get::<i64>(), Ok(cache));
        }
    }

    #[test]
    fn test_typed_cache_mismatch() {
        assert!(cached(0).typed_cache::<f64>().is_err());
        assert!(memory(0).typed_cache::<i64>().is_err());
    }
}
