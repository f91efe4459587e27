//! Error types for the PSI buffer.

use thiserror::Error;

/// Errors recorded by a [`PsiBuffer`](crate::PsiBuffer).
///
/// The buffer keeps the first error it meets ("sticky" error). Once set,
/// every subsequent read returns a zero value and every subsequent write is
/// ignored until the error is cleared.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Attempted to read past the active read bound.
    #[error("Read overflow at bit offset {offset}: {requested} bits requested, {available} available")]
    ReadOverflow {
        offset: usize,
        requested: usize,
        available: usize,
    },

    /// Attempted to write past the active write bound.
    #[error("Write overflow at bit offset {offset}: {requested} bits requested, {available} available")]
    WriteOverflow {
        offset: usize,
        requested: usize,
        available: usize,
    },

    /// A deferred length field is too narrow for the data written after it.
    #[error("Length {length} does not fit in a {bits}-bit length field")]
    LengthOverflow { length: usize, bits: usize },

    /// A byte-aligned operation was attempted at a non-aligned position.
    #[error("Operation requires byte alignment (bit offset {0})")]
    Unaligned(usize),

    /// A read was attempted on a writer or a write on a reader.
    #[error("Wrong buffer mode: {0}")]
    WrongMode(&'static str),

    /// Mismatched push/pop/swap of saved states.
    #[error("Invalid state stack operation: {0}")]
    StateStack(&'static str),

    /// A format-specific shape rule is violated.
    #[error("Invalid structure: {0}")]
    Shape(String),

    /// A descriptor header announces more payload than remains in its loop.
    #[error("Truncated descriptor 0x{tag:02X}: {length} bytes declared, {available} available")]
    TruncatedDescriptor {
        tag: u8,
        length: usize,
        available: usize,
    },

    /// A descriptor payload exceeds 255 bytes.
    #[error("Descriptor 0x{tag:02X} payload too long: {length} bytes (max: 255)")]
    DescriptorTooLong { tag: u8, length: usize },
}

impl BufferError {
    /// Returns true if this error means the data did not fit in the writable space.
    pub fn is_write_overflow(&self) -> bool {
        matches!(self, BufferError::WriteOverflow { .. })
    }

    /// Returns true if the data does not have the shape its format requires,
    /// including a length too large for its length field.
    pub fn is_shape(&self) -> bool {
        matches!(
            self,
            BufferError::Shape(_)
                | BufferError::LengthOverflow { .. }
                | BufferError::DescriptorTooLong { .. }
        )
    }

    /// Returns true if this error comes from truncated input data.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            BufferError::ReadOverflow { .. } | BufferError::TruncatedDescriptor { .. }
        )
    }
}
