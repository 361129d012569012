//! CDR error types

use thiserror::Error;

/// CDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum CdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Invalid string - missing terminator or bad length
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// UTF-16 decoding error
    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::char::DecodeUtf16Error),

    /// Boolean octet other than 0 or 1
    #[error("invalid boolean octet: {0}")]
    InvalidBoolean(u8),

    /// TypeCode kind not understood by this implementation
    #[error("unsupported TypeCode kind: {0}")]
    BadTypeCodeKind(u32),

    /// Enum ordinal outside the member list
    #[error("invalid enum value {value} (enum has {count} members)")]
    InvalidEnumValue { value: u32, count: usize },

    /// Union discriminator of a kind that cannot discriminate
    #[error("invalid union discriminator: {0}")]
    InvalidDiscriminant(String),

    /// Bounded string or sequence longer than its bound
    #[error("bound exceeded: length {len} > bound {bound}")]
    BoundExceeded { len: usize, bound: u32 },

    /// Array value whose element count differs from the TypeCode
    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// TypeCode indirection that does not point at an earlier TypeCode
    #[error("bad TypeCode indirection offset {offset} at position {position}")]
    BadIndirection { offset: i32, position: usize },

    /// Recursive TypeCode placeholder with no enclosing definition
    #[error("unresolved recursive TypeCode {0}")]
    UnresolvedRecursion(String),

    /// Value nesting deeper than the decoder accepts
    #[error("nesting too deep: {0} levels")]
    NestingTooDeep(usize),

    /// Value shape does not match its TypeCode
    #[error("value does not match TypeCode: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: &'static str },

    /// Encapsulation length inconsistent with the enclosing buffer
    #[error("invalid encapsulation: {0}")]
    InvalidEncapsulation(String),

    /// In-memory size of a type does not fit the address space
    #[error("size overflow: {0}")]
    SizeOverflow(String),

    /// Malformed interoperable object reference
    #[error("invalid IOR: {0}")]
    InvalidIor(String),

    /// Internal consistency failure; the value or TypeCode graph is corrupt
    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl CdrError {
    /// Whether this error signals corrupted state rather than bad input.
    ///
    /// Callers must not continue using the value that produced a fatal
    /// error; the marshal size accounting for it can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CdrError::Internal(_))
    }
}

/// Result type for CDR operations
pub type Result<T> = std::result::Result<T, CdrError>;
