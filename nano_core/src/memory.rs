//! Partitioned VM memory.

use crate::container::{ContainerRef, DataContainer};
use crate::error::{DataError, DataResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Memory partition an operand lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Temporaries written by the compiler.
    Register,
    /// Function-local variables.
    Local,
    /// Global variables shared with the host.
    Global,
    /// Immediate values.
    Constant,
    /// Call stack; not addressable by operands.
    Stack,
    /// Placeholder operand.
    None,
}

impl Partition {
    /// Every partition, in index order.
    pub const ALL: [Partition; 6] = [
        Self::Register,
        Self::Local,
        Self::Global,
        Self::Constant,
        Self::Stack,
        Self::None,
    ];

    /// Number of partitions.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index of the partition.
    #[inline(always)]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// One-letter prefix used when rendering operands.
    #[inline]
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::Register => 'R',
            Self::Local => 'L',
            Self::Global => 'G',
            Self::Constant => 'C',
            Self::Stack => 'S',
            Self::None => 'N',
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Register => "REGISTER",
            Self::Local => "LOCAL",
            Self::Global => "GLOBAL",
            Self::Constant => "CONSTANT",
            Self::Stack => "STACK",
            Self::None => "NONE",
        })
    }
}

const ADDRESSABLE: usize = 4;

/// VM memory: addressable partitions of containers, plus the program result.
#[derive(Debug)]
pub struct Memory {
    partitions: [Vec<ContainerRef>; ADDRESSABLE],
    void: ContainerRef,
    result: RefCell<Option<ContainerRef>>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Create empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: Default::default(),
            void: Rc::new(DataContainer::new()),
            result: RefCell::new(None),
        }
    }

    #[inline]
    fn slot(partition: Partition) -> Option<usize> {
        match partition {
            Partition::Register | Partition::Local | Partition::Global | Partition::Constant => {
                Some(partition.index())
            }
            Partition::Stack | Partition::None => None,
        }
    }

    /// Append `count` unallocated containers to `partition`.
    pub fn allocate(&mut self, partition: Partition, count: usize) -> DataResult<()> {
        let slot = Self::slot(partition).ok_or(DataError::UnaddressablePartition(partition))?;
        self.partitions[slot].extend((0..count).map(|_| Rc::new(DataContainer::new())));
        Ok(())
    }

    /// Append a container to `partition` and return its address.
    pub fn push(&mut self, partition: Partition, container: DataContainer) -> DataResult<usize> {
        let slot = Self::slot(partition).ok_or(DataError::UnaddressablePartition(partition))?;
        let cells = &mut self.partitions[slot];
        cells.push(Rc::new(container));
        Ok(cells.len() - 1)
    }

    /// Replace the container at (`partition`, `address`).
    pub fn store(
        &mut self,
        partition: Partition,
        address: usize,
        container: DataContainer,
    ) -> DataResult<()> {
        let slot = Self::slot(partition).ok_or(DataError::UnaddressablePartition(partition))?;
        let cells = &mut self.partitions[slot];
        let size = cells.len();
        let cell = cells.get_mut(address).ok_or(DataError::AddressOutOfRange {
            partition,
            address,
            size,
        })?;
        *cell = Rc::new(container);
        Ok(())
    }

    /// Resolve (`partition`, `address`) to its container.
    ///
    /// The `None` partition always resolves to the shared placeholder.
    pub fn container(&self, partition: Partition, address: usize) -> DataResult<ContainerRef> {
        if partition == Partition::None {
            return Ok(Rc::clone(&self.void));
        }
        let slot = Self::slot(partition).ok_or(DataError::UnaddressablePartition(partition))?;
        let cells = &self.partitions[slot];
        cells
            .get(address)
            .cloned()
            .ok_or(DataError::AddressOutOfRange {
                partition,
                address,
                size: cells.len(),
            })
    }

    /// All containers of `partition`.
    #[must_use]
    pub fn containers(&self, partition: Partition) -> &[ContainerRef] {
        match Self::slot(partition) {
            Some(slot) => &self.partitions[slot],
            None => &[],
        }
    }

    /// Number of addressable cells in `partition`.
    #[must_use]
    pub fn size(&self, partition: Partition) -> usize {
        match partition {
            Partition::None => 1,
            _ => self.containers(partition).len(),
        }
    }

    /// Record the program's result value.
    pub fn set_result(&self, result: Option<ContainerRef>) {
        *self.result.borrow_mut() = result;
    }

    /// The result recorded by `END`, if any.
    #[must_use]
    pub fn result(&self) -> Option<ContainerRef> {
        self.result.borrow().clone()
    }
}
