//! Data types of memory cells and instruction operands.

use std::fmt;

/// Element type of a [`DataContainer`](crate::DataContainer) or of an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE-754 float.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// No data.
    #[default]
    Void,
}

impl DataType {
    /// Name used when rendering instructions.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Void => "void",
        }
    }

    /// Whether a scalar of this type can be mirrored by a scalar cache.
    #[inline]
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64 | Self::Bool)
    }

    /// Whether arithmetic operators apply to this type.
    #[inline]
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cacheable_types() {
        assert!(DataType::Int64.is_cacheable());
        assert!(DataType::Float64.is_cacheable());
        assert!(DataType::Bool.is_cacheable());
        assert!(!DataType::String.is_cacheable());
        assert!(!DataType::Void.is_cacheable());
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::Float64.to_string(), "float64");
        assert_eq!(DataType::default(), DataType::Void);
    }
}
