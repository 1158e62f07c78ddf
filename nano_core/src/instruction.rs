//! Address-based instructions.

use crate::data_type::DataType;
use crate::location::SourceLocation;
use crate::memory::Partition;
use crate::opcode::Opcode;
use smallvec::SmallVec;
use std::fmt;

/// Reference to one memory cell: (partition, address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandRef {
    /// Partition of the cell.
    pub partition: Partition,
    /// Address within the partition.
    pub address: usize,
}

impl OperandRef {
    /// Create a new operand reference.
    #[inline]
    #[must_use]
    pub const fn new(partition: Partition, address: usize) -> Self {
        Self { partition, address }
    }

    /// Register cell.
    #[inline]
    #[must_use]
    pub const fn register(address: usize) -> Self {
        Self::new(Partition::Register, address)
    }

    /// Local variable cell.
    #[inline]
    #[must_use]
    pub const fn local(address: usize) -> Self {
        Self::new(Partition::Local, address)
    }

    /// Global variable cell.
    #[inline]
    #[must_use]
    pub const fn global(address: usize) -> Self {
        Self::new(Partition::Global, address)
    }

    /// Constant cell.
    #[inline]
    #[must_use]
    pub const fn constant(address: usize) -> Self {
        Self::new(Partition::Constant, address)
    }

    /// Placeholder operand.
    #[inline]
    #[must_use]
    pub const fn placeholder() -> Self {
        Self::new(Partition::None, 0)
    }
}

impl fmt::Display for OperandRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partition == Partition::None {
            f.write_str("-")
        } else {
            write!(f, "{}{}", self.partition.prefix(), self.address)
        }
    }
}

/// Operand list; most instructions have at most four.
pub type Operands = SmallVec<[OperandRef; 4]>;

/// Operand data types; most instructions carry one or two.
pub type DataTypes = SmallVec<[DataType; 2]>;

/// One instruction of the intermediate code.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    opcode: Opcode,
    data_types: DataTypes,
    operands: Operands,
    location: Option<SourceLocation>,
}

impl Instruction {
    /// Create an instruction without source location.
    #[must_use]
    pub fn new(opcode: Opcode, data_types: &[DataType], operands: &[OperandRef]) -> Self {
        Self {
            opcode,
            data_types: DataTypes::from_slice(data_types),
            operands: Operands::from_slice(operands),
            location: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Operation code.
    #[inline]
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Operand data types.
    #[inline]
    #[must_use]
    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }

    /// Primary data type (type of operand 0), `Void` if none.
    #[inline]
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_types.first().copied().unwrap_or_default()
    }

    /// Operand references.
    #[inline]
    #[must_use]
    pub fn operands(&self) -> &[OperandRef] {
        &self.operands
    }

    /// Number of operands.
    #[inline]
    #[must_use]
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Source location, if known.
    #[inline]
    #[must_use]
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t", self.opcode)?;
        for (i, data_type) in self.data_types.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{data_type}")?;
        }
        for operand in &self.operands {
            write!(f, "\t{operand}")?;
        }
        Ok(())
    }
}
