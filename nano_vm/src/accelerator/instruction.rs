//! Scheduled instructions and acceleration types.

use crate::error::ErrorLocation;
use nano_core::{DataType, Instruction, Opcode, OperandRef, SourceLocation};
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Acceleration Types
// =============================================================================

/// Element type of a specialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// int64 elements.
    Int64,
    /// float64 elements.
    Float64,
    /// bool elements.
    Bool,
}

impl ElementType {
    /// Element type for `data_type`, if one exists.
    #[inline]
    pub fn of(data_type: DataType) -> Option<Self> {
        match data_type {
            DataType::Int64 => Some(Self::Int64),
            DataType::Float64 => Some(Self::Float64),
            DataType::Bool => Some(Self::Bool),
            DataType::String | DataType::Void => None,
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::Int64 => "I64",
            Self::Float64 => "F64",
            Self::Bool => "B",
        }
    }
}

/// Operand shape of a specialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Every operand is an array.
    Vector,
    /// Every operand is a scalar read through memory.
    Scalar,
    /// Every operand is a scalar with a cache.
    CachedScalar,
    /// Array destination, scalar source.
    VectorScalar,
    /// Scalar destination, array source.
    ScalarVector,
}

impl Shape {
    const fn code(self) -> &'static str {
        match self {
            Self::Vector => "V",
            Self::Scalar => "S",
            Self::CachedScalar => "CS",
            Self::VectorScalar => "VS",
            Self::ScalarVector => "SV",
        }
    }
}

/// Operator category of a specialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// ADD SUB MUL DIV REM NEG.
    Arithmetic,
    /// Two fused arithmetic instructions.
    DualArithmetic,
    /// EQ NEQ GT LT GEQ LEQ.
    Comparison,
    /// ANDM ORM NOT.
    Logical,
    /// MOV CAST FILL.
    Transfer,
    /// A fused run of MOVs.
    MultipleTransfer,
    /// MOVELM REFELM.
    Subscript,
    /// JMP JMPN.
    Branch,
    /// ALLOC ALLOCR.
    Allocation,
}

impl Category {
    const fn name(self) -> &'static str {
        match self {
            Self::Arithmetic => "ARITHMETIC",
            Self::DualArithmetic => "DUAL_ARITHMETIC",
            Self::Comparison => "COMPARISON",
            Self::Logical => "LOGICAL",
            Self::Transfer => "TRANSFER",
            Self::MultipleTransfer => "MULTIPLE_TRANSFER",
            Self::Subscript => "SUBSCRIPT",
            Self::Branch => "BRANCH",
            Self::Allocation => "ALLOCATION",
        }
    }
}

/// Which execution unit handles an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationType {
    /// A specialized unit.
    Unit {
        /// Operator category.
        category: Category,
        /// Element type of operand 0 (of the inputs, for comparisons).
        element: ElementType,
        /// Operand shape.
        shape: Shape,
    },
    /// CALL RET POP MOVPOP REFPOP ALLOCP and EX/RETURNED.
    FunctionControl,
    /// CALLX.
    ExternalFunctionControl,
    /// No effect.
    Nop,
    /// Delegated to the generic processor.
    Bypass,
}

impl AccelerationType {
    /// Specialized unit tag.
    #[inline]
    pub const fn unit(category: Category, element: ElementType, shape: Shape) -> Self {
        Self::Unit {
            category,
            element,
            shape,
        }
    }

    /// Whether this is a cached-scalar unit of `category`.
    #[inline]
    pub fn is_cached(self, category: Category) -> bool {
        matches!(self, Self::Unit { category: c, shape: Shape::CachedScalar, .. } if c == category)
    }
}

impl fmt::Display for AccelerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit {
                category,
                element,
                shape,
            } => write!(f, "{}{}_{}", element.prefix(), shape.code(), category.name()),
            Self::FunctionControl => f.write_str("FUNCTION_CONTROL"),
            Self::ExternalFunctionControl => f.write_str("EXTERNAL_FUNCTION_CONTROL"),
            Self::Nop => f.write_str("NOP"),
            Self::Bypass => f.write_str("BYPASS"),
        }
    }
}

/// Accelerator-only meaning of an `EX` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedOpcode {
    /// Placed right after a CALL; reloads argument caches after the callee returned.
    Returned,
}

// =============================================================================
// Accelerator Instruction
// =============================================================================

/// Instruction annotated by the scheduler.
///
/// Fused instructions carry the opcodes of every part in `fused_opcodes`
/// and the concatenated operand lists of all parts; `fused_inputs` holds
/// the index of the first operand of each part.
#[derive(Debug, Clone)]
pub struct AcceleratorInstruction {
    instruction: Instruction,
    acceleration: AccelerationType,
    fused_opcodes: SmallVec<[Opcode; 2]>,
    fused_inputs: SmallVec<[usize; 2]>,
    extended: Option<ExtendedOpcode>,
    unreordered_address: usize,
    reordered_address: usize,
    reordered_label_address: Option<usize>,
}

impl AcceleratorInstruction {
    /// Wrap `instruction` found at `address`.
    pub fn new(instruction: Instruction, address: usize) -> Self {
        Self {
            instruction,
            acceleration: AccelerationType::Bypass,
            fused_opcodes: SmallVec::new(),
            fused_inputs: SmallVec::new(),
            extended: None,
            unreordered_address: address,
            reordered_address: address,
            reordered_label_address: None,
        }
    }

    /// An `EX` instruction with extended meaning, standing at `address`.
    pub fn extended(
        extended: ExtendedOpcode,
        operands: &[OperandRef],
        address: usize,
        location: Option<SourceLocation>,
    ) -> Self {
        let mut instruction = Instruction::new(Opcode::Ex, &[DataType::Void], operands);
        if let Some(location) = location {
            instruction = instruction.with_location(location);
        }
        Self {
            extended: Some(extended),
            ..Self::new(instruction, address)
        }
    }

    /// Merge consecutive `parts` into one instruction tagged `acceleration`.
    ///
    /// The result takes the address and location of the first part.
    pub fn fuse(parts: &[AcceleratorInstruction], acceleration: AccelerationType) -> Option<Self> {
        let first = parts.first()?;
        let mut operands: SmallVec<[OperandRef; 8]> = SmallVec::new();
        let mut fused_opcodes = SmallVec::new();
        let mut fused_inputs = SmallVec::new();
        for part in parts {
            fused_opcodes.push(part.opcode());
            fused_inputs.push(operands.len());
            operands.extend_from_slice(part.operands());
        }
        let mut instruction = Instruction::new(first.opcode(), first.data_types(), &operands);
        if let Some(location) = first.location() {
            instruction = instruction.with_location(location.clone());
        }
        Some(Self {
            instruction,
            acceleration,
            fused_opcodes,
            fused_inputs,
            extended: None,
            unreordered_address: first.unreordered_address,
            reordered_address: first.reordered_address,
            reordered_label_address: None,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The underlying instruction.
    #[inline]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Operation code (of the first part, when fused).
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.instruction.opcode()
    }

    /// Operand data types.
    #[inline]
    pub fn data_types(&self) -> &[DataType] {
        self.instruction.data_types()
    }

    /// Type of operand 0.
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.instruction.data_type()
    }

    /// Operand references.
    #[inline]
    pub fn operands(&self) -> &[OperandRef] {
        self.instruction.operands()
    }

    /// Source location.
    #[inline]
    pub fn location(&self) -> Option<&SourceLocation> {
        self.instruction.location()
    }

    /// Assigned acceleration type.
    #[inline]
    pub fn acceleration(&self) -> AccelerationType {
        self.acceleration
    }

    pub(crate) fn set_acceleration(&mut self, acceleration: AccelerationType) {
        self.acceleration = acceleration;
    }

    /// Whether this instruction merges several.
    #[inline]
    pub fn is_fused(&self) -> bool {
        !self.fused_opcodes.is_empty()
    }

    /// Opcodes of the fused parts.
    #[inline]
    pub fn fused_opcodes(&self) -> &[Opcode] {
        &self.fused_opcodes
    }

    /// First operand index of each fused part.
    #[inline]
    pub fn fused_inputs(&self) -> &[usize] {
        &self.fused_inputs
    }

    /// Extended opcode of an `EX`.
    #[inline]
    pub fn extended_opcode(&self) -> Option<ExtendedOpcode> {
        self.extended
    }

    /// Address in the code as compiled.
    #[inline]
    pub fn unreordered_address(&self) -> usize {
        self.unreordered_address
    }

    /// Address after scheduling; equals the node index.
    #[inline]
    pub fn reordered_address(&self) -> usize {
        self.reordered_address
    }

    pub(crate) fn set_reordered_address(&mut self, address: usize) {
        self.reordered_address = address;
    }

    /// Reordered address of the branch or call target.
    #[inline]
    pub fn reordered_label_address(&self) -> Option<usize> {
        self.reordered_label_address
    }

    pub(crate) fn set_reordered_label_address(&mut self, address: usize) {
        self.reordered_label_address = Some(address);
    }

    /// Where an error raised by this instruction's node is reported.
    pub fn error_location(&self) -> ErrorLocation {
        ErrorLocation {
            address: self.unreordered_address,
            reordered_address: self.reordered_address,
            instruction: self.instruction.to_string().into(),
            source: self.location().cloned(),
        }
    }
}

impl fmt::Display for AcceleratorInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {}\t{}", self.instruction, self.acceleration)?;
        if let Some(ExtendedOpcode::Returned) = self.extended {
            f.write_str("(RETURNED)")?;
        }
        if self.is_fused() {
            f.write_str("(")?;
            for (i, opcode) in self.fused_opcodes.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{opcode}")?;
            }
            f.write_str(")")?;
        }
        if let Some(label) = self.reordered_label_address {
            write!(f, " (reorderedLabelAddress={label})")?;
        }
        f.write_str(" ]")
    }
}
