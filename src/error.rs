//! Error types for portable-binary file operations
//!
//! # Why Custom Error Types?
//!
//! An operation on a self-describing file can fail in very different ways:
//! the byte stream itself can fail, the file can be structurally corrupt, a
//! path expression can be malformed, or the data model can be violated
//! (unknown type, inconsistent append). A unified error type with specific
//! variants lets callers tell a retryable I/O failure apart from a hopeless
//! one (a bad expression stays bad no matter how often it is retried).

use std::fmt;
use std::io;

/// Result type for portable-binary file operations
pub type PdbResult<T> = Result<T, PdbError>;

/// Errors that can occur while operating on a portable-binary file
#[derive(Debug)]
pub enum PdbError {
    /// I/O error on the underlying byte stream
    ///
    /// # Common Causes
    /// - File not found
    /// - Permission denied
    /// - Disk full (for writes)
    /// - Truncated file (for reads)
    Stream(io::Error),

    /// Structurally invalid file
    ///
    /// # Common Causes
    /// - Corrupted or unknown header token
    /// - Unparseable format block, chart, symbol table, or extras record
    /// - Malformed itag preceding pointer data
    Format { reason: String },

    /// Type system violation
    ///
    /// # Common Causes
    /// - Unknown type name in a chart lookup
    /// - Struct member whose type was never installed
    /// - Cast controller that is not a `char *` member
    Type { reason: String },

    /// Append with dimensions inconsistent with the existing entry
    DimensionMismatch { reason: String },

    /// Index outside the declared shape of an entry
    IndexOutOfBounds { index: i64, count: u64 },

    /// Malformed hyper-index expression
    Syntax { expr: String, reason: String },

    /// Range applied to a node that is neither an array nor a pointer
    NotIndexable { name: String },

    /// Struct member name not found during path resolution
    UnknownMember { ty: String, member: String },

    /// Variable name not found in the symbol table
    UnknownVariable { name: String },

    /// Heap or buffer sizing failure
    ///
    /// # Why This Exists
    /// An itag can claim an item count whose byte size overflows, and a
    /// caller-supplied buffer can be smaller than the data it must receive.
    /// Both are reported here rather than panicking.
    Allocation { reason: String },
}

impl fmt::Display for PdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdbError::Stream(e) => write!(f, "stream error: {}", e),
            PdbError::Format { reason } => write!(f, "bad file structure: {}", reason),
            PdbError::Type { reason } => write!(f, "type error: {}", reason),
            PdbError::DimensionMismatch { reason } => {
                write!(f, "inconsistent dimensions: {}", reason)
            }
            PdbError::IndexOutOfBounds { index, count } => {
                write!(f, "index {} out of bounds for {} items", index, count)
            }
            PdbError::Syntax { expr, reason } => {
                write!(f, "bad index expression {:?}: {}", expr, reason)
            }
            PdbError::NotIndexable { name } => {
                write!(f, "hyper index on non-indexable node {:?}", name)
            }
            PdbError::UnknownMember { ty, member } => {
                write!(f, "type {:?} has no member {:?}", ty, member)
            }
            PdbError::UnknownVariable { name } => {
                write!(f, "no symbol table entry for {:?}", name)
            }
            PdbError::Allocation { reason } => write!(f, "allocation error: {}", reason),
        }
    }
}

impl std::error::Error for PdbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PdbError::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PdbError {
    fn from(err: io::Error) -> Self {
        PdbError::Stream(err)
    }
}

impl PdbError {
    /// True for failures where retrying the same call could succeed.
    ///
    /// Parse-time and model errors are deterministic; only stream errors
    /// reflect a condition outside the file's own content.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PdbError::Stream(_))
    }

    pub(crate) fn format(reason: impl Into<String>) -> Self {
        PdbError::Format { reason: reason.into() }
    }

    pub(crate) fn type_err(reason: impl Into<String>) -> Self {
        PdbError::Type { reason: reason.into() }
    }

    pub(crate) fn syntax(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        PdbError::Syntax { expr: expr.into(), reason: reason.into() }
    }
}
