//! Operation codes of the intermediate instruction set.

use std::fmt;

/// Operation code of an [`Instruction`](crate::Instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // =========================================================================
    // Arithmetic
    // =========================================================================
    /// `dst = a + b`
    Add,
    /// `dst = a - b`
    Sub,
    /// `dst = a * b`
    Mul,
    /// `dst = a / b`
    Div,
    /// `dst = a % b`
    Rem,
    /// `dst = -a`
    Neg,

    // =========================================================================
    // Comparison
    // =========================================================================
    /// `dst = a == b`
    Eq,
    /// `dst = a != b`
    Neq,
    /// `dst = a > b`
    Gt,
    /// `dst = a < b`
    Lt,
    /// `dst = a >= b`
    Geq,
    /// `dst = a <= b`
    Leq,

    // =========================================================================
    // Logical
    // =========================================================================
    /// `dst = a && b`, right side possibly elided
    Andm,
    /// `dst = a || b`, right side possibly elided
    Orm,
    /// `dst = !a`
    Not,

    // =========================================================================
    // Transfer
    // =========================================================================
    /// Value copy.
    Mov,
    /// Reference assignment.
    Ref,
    /// Discard the top of the data stack.
    Pop,
    /// Pop and value-copy.
    Movpop,
    /// Pop and reference-assign.
    Refpop,
    /// Type conversion.
    Cast,
    /// Reshape-copy between arrays.
    Reord,
    /// Broadcast a scalar into every element.
    Fill,
    /// Element read by value.
    Movelm,
    /// Element reference.
    Refelm,

    // =========================================================================
    // Allocation
    // =========================================================================
    /// Allocate to the given lengths.
    Alloc,
    /// Allocate to another container's shape.
    Allocr,
    /// Allocate to the shape of the data-stack top.
    Allocp,
    /// Type annotation; no effect.
    Alloct,
    /// Release data.
    Free,

    // =========================================================================
    // Control
    // =========================================================================
    /// Jump if every condition element is true.
    Jmp,
    /// Jump if every condition element is false.
    Jmpn,
    /// Call a script function.
    Call,
    /// Call a host function.
    Callx,
    /// Return from a script function.
    Ret,
    /// End of a function body reached without returning.
    Endfun,
    /// End of a function's parameter section.
    Endprm,
    /// End of the program.
    End,

    // =========================================================================
    // Misc
    // =========================================================================
    /// Extended operation; meaning given by the accelerator's extension code.
    Ex,
    /// No operation.
    Nop,
    /// Jump target marker.
    Label,
}

impl Opcode {
    /// Upper-case mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Rem => "REM",
            Self::Neg => "NEG",
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Gt => "GT",
            Self::Lt => "LT",
            Self::Geq => "GEQ",
            Self::Leq => "LEQ",
            Self::Andm => "ANDM",
            Self::Orm => "ORM",
            Self::Not => "NOT",
            Self::Mov => "MOV",
            Self::Ref => "REF",
            Self::Pop => "POP",
            Self::Movpop => "MOVPOP",
            Self::Refpop => "REFPOP",
            Self::Cast => "CAST",
            Self::Reord => "REORD",
            Self::Fill => "FILL",
            Self::Movelm => "MOVELM",
            Self::Refelm => "REFELM",
            Self::Alloc => "ALLOC",
            Self::Allocr => "ALLOCR",
            Self::Allocp => "ALLOCP",
            Self::Alloct => "ALLOCT",
            Self::Free => "FREE",
            Self::Jmp => "JMP",
            Self::Jmpn => "JMPN",
            Self::Call => "CALL",
            Self::Callx => "CALLX",
            Self::Ret => "RET",
            Self::Endfun => "ENDFUN",
            Self::Endprm => "ENDPRM",
            Self::End => "END",
            Self::Ex => "EX",
            Self::Nop => "NOP",
            Self::Label => "LABEL",
        }
    }

    /// Binary arithmetic operator.
    #[inline]
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }

    /// Comparison operator.
    #[inline]
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Gt | Self::Lt | Self::Geq | Self::Leq
        )
    }

    /// Transfers control to a statically known label.
    #[inline]
    #[must_use]
    pub const fn has_label_operand(self) -> bool {
        matches!(self, Self::Jmp | Self::Jmpn | Self::Call | Self::Ret)
    }

    /// Writes operand 0.
    #[must_use]
    pub const fn writes_destination(self) -> bool {
        !matches!(
            self,
            Self::Jmp
                | Self::Jmpn
                | Self::Ret
                | Self::Pop
                | Self::Endfun
                | Self::Endprm
                | Self::End
                | Self::Ex
                | Self::Nop
                | Self::Label
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
