//! Error types for the cborkit-core library.
//!
//! Every failure the codec can produce is a variant of [`Error`]. Decode
//! errors carry the byte offset of the item that violated the format so that
//! malformed or adversarial input can be diagnosed.

use thiserror::Error;

/// Result type alias for cborkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all cborkit operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A read requested more bytes than remain in the input
    #[error("unexpected end of input at offset {offset}: need {requested} bytes, {remaining} remaining")]
    UnexpectedEndOfInput {
        /// Byte offset of the failed read
        offset: usize,
        /// Number of bytes requested
        requested: usize,
        /// Number of bytes left in the input
        remaining: usize,
    },

    /// Reserved additional-info value, misplaced break, or illegal indefinite length
    #[error("invalid header at offset {offset}: {details}")]
    InvalidHeader {
        /// Byte offset of the header
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Declared length exceeds the configured cap or what the input can hold
    #[error("declared length {length} at offset {offset} exceeds limit {limit}")]
    LengthOverflow {
        /// Byte offset of the header declaring the length
        offset: usize,
        /// The declared length
        length: u64,
        /// The limit that was exceeded
        limit: u64,
    },

    /// Text string payload is not valid UTF-8
    #[error("invalid utf-8 in text string at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the text string header
        offset: usize,
    },

    /// Bignum, decimal-fraction or bigfloat payload has the wrong shape
    #[error("malformed numeric tag {tag} at offset {offset}: {reason}")]
    MalformedNumericTag {
        /// Byte offset of the tag header
        offset: usize,
        /// The tag number
        tag: u64,
        /// Which constraint was violated
        reason: String,
    },

    /// Well-formed value outside the representable numeric range
    #[error("numeric value at offset {offset} out of range: {details}")]
    NumericRange {
        /// Byte offset of the tag header
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Nesting exceeds the configured depth bound
    #[error("nesting depth exceeds limit {limit} at offset {offset}")]
    DepthExceeded {
        /// Byte offset of the item that would open the next level
        offset: usize,
        /// Configured depth limit
        limit: usize,
    },

    /// Map key repeated while duplicate keys are rejected
    #[error("duplicate map key at offset {offset}")]
    DuplicateMapKey {
        /// Byte offset of the repeated key
        offset: usize,
    },

    /// Bytes left over after a single complete item
    #[error("{remaining} trailing bytes after item at offset {offset}")]
    TrailingData {
        /// Byte offset where the trailing data starts
        offset: usize,
        /// Number of trailing bytes
        remaining: usize,
    },

    /// Failure reported by the caller-supplied output sink
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
}

impl Error {
    /// Creates a new end-of-input error
    pub fn unexpected_end(offset: usize, requested: usize, remaining: usize) -> Self {
        Self::UnexpectedEndOfInput {
            offset,
            requested,
            remaining,
        }
    }

    /// Creates a new invalid header error
    pub fn invalid_header(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidHeader {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new length overflow error
    pub fn length_overflow(offset: usize, length: u64, limit: u64) -> Self {
        Self::LengthOverflow {
            offset,
            length,
            limit,
        }
    }

    /// Creates a new malformed numeric tag error
    pub fn malformed_numeric(offset: usize, tag: u64, reason: impl Into<String>) -> Self {
        Self::MalformedNumericTag {
            offset,
            tag,
            reason: reason.into(),
        }
    }

    /// Creates a new numeric range error
    pub fn numeric_range(offset: usize, details: impl Into<String>) -> Self {
        Self::NumericRange {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new depth exceeded error
    pub fn depth_exceeded(offset: usize, limit: usize) -> Self {
        Self::DepthExceeded { offset, limit }
    }

    /// Returns the byte offset the error refers to, if any
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::UnexpectedEndOfInput { offset, .. }
            | Self::InvalidHeader { offset, .. }
            | Self::LengthOverflow { offset, .. }
            | Self::InvalidUtf8 { offset }
            | Self::MalformedNumericTag { offset, .. }
            | Self::NumericRange { offset, .. }
            | Self::DepthExceeded { offset, .. }
            | Self::DuplicateMapKey { offset }
            | Self::TrailingData { offset, .. } => Some(*offset),
            Self::Sink(_) => None,
        }
    }

    /// Returns true if the error was caused by input ending early.
    ///
    /// A definite array or map whose declared count exceeds the remaining
    /// input is reported as [`Error::LengthOverflow`] instead, since that
    /// check runs before any item is read. Callers reading from an
    /// incremental source should treat both as possibly incomplete input.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::UnexpectedEndOfInput { .. })
    }
}
