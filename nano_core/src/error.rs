//! Errors raised by the data model.
//!
//! These cover failures of memory access and container manipulation:
//! - Addressing errors (bad partition or address)
//! - Type errors (a container holds a different element type)
//! - Shape errors (size or index outside the container's extent)

use crate::data_type::DataType;
use crate::memory::Partition;
use thiserror::Error;

/// Result type for data-model operations.
pub type DataResult<T> = Result<T, DataError>;

/// Failure while accessing or manipulating memory.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// Address beyond the end of a partition.
    #[error("address {address} is out of range for the {partition} partition (size {size})")]
    AddressOutOfRange {
        /// Partition being addressed.
        partition: Partition,
        /// Requested address.
        address: usize,
        /// Number of cells in the partition.
        size: usize,
    },

    /// Partition that cannot be addressed directly.
    #[error("the {0} partition is not addressable")]
    UnaddressablePartition(Partition),

    /// Container holds a different element type than the operation expects.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type required by the operation.
        expected: DataType,
        /// Type actually stored.
        found: DataType,
    },

    /// Element offset beyond the backing array.
    #[error("element {index} is outside the backing array of length {length}")]
    OffsetOutOfBounds {
        /// Requested element position.
        index: usize,
        /// Length of the backing array.
        length: usize,
    },

    /// Subscript index outside its dimension.
    #[error("index {index} is out of bounds for dimension {dimension} of length {length}")]
    SubscriptOutOfBounds {
        /// The offending index value.
        index: i64,
        /// Dimension position (0-based).
        dimension: usize,
        /// Length of that dimension.
        length: usize,
    },

    /// Subscript with a different rank than the array.
    #[error("array of rank {array_rank} accessed with {index_count} indices")]
    RankMismatch {
        /// Rank of the array.
        array_rank: usize,
        /// Number of indices supplied.
        index_count: usize,
    },

    /// Element-wise operation on operands of different sizes.
    #[error("operand sizes differ: {expected} and {found}")]
    SizeMismatch {
        /// Size of the destination.
        expected: usize,
        /// Size of the offending operand.
        found: usize,
    },

    /// Array of a type that has no storage.
    #[error("cannot allocate an array of type {0}")]
    UnallocatableType(DataType),

    /// Negative array length.
    #[error("negative array length: {0}")]
    NegativeLength(i64),

    /// Pop from an empty stack.
    #[error("stack underflow")]
    StackUnderflow,
}
