//! Source locations attached to instructions.

use std::fmt;
use std::sync::Arc;

/// Script file and line an instruction was compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Script file name.
    pub file: Arc<str>,
    /// 1-based line number.
    pub line: u32,
}

impl SourceLocation {
    /// Create a new location.
    #[inline]
    #[must_use]
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
