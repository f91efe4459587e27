//! Error types for table serialization and deserialization.

use psi_buffer::BufferError;
use thiserror::Error;

/// Errors raised while packing a table into sections or decoding it back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Bit-level encoding or decoding failed.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// An entry or trailing field cannot fit even in an empty section.
    #[error("{what} #{index} needs {size} bytes, an empty section holds {capacity}")]
    Capacity {
        what: &'static str,
        index: usize,
        size: usize,
        capacity: usize,
    },

    /// More than 256 sections would be needed.
    #[error("Table needs more than 256 sections")]
    TooManySections,

    /// The section does not belong to the expected table.
    #[error("Wrong table id: expected 0x{expected:02X}, got 0x{actual:02X}")]
    WrongTableId { expected: u8, actual: u8 },

    /// The section framing is broken.
    #[error("Invalid section: {0}")]
    InvalidSection(String),

    /// Sections of one table disagree on their common header fields.
    #[error("Inconsistent section #{section}: {reason}")]
    InconsistentSection { section: u8, reason: &'static str },

    /// A section number is missing from a table.
    #[error("Missing section #{0}")]
    MissingSection(u8),

    /// Section CRC32 does not match its content.
    #[error("CRC32 mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    Crc { expected: u32, computed: u32 },

    /// No codec is registered for this table id.
    #[error("Unknown table id: 0x{0:02X}")]
    UnknownTableId(u8),

    /// Invalid codec configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result alias for table operations.
pub type TableResult<T> = Result<T, TableError>;
