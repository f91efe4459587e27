//! Bit-level serialization primitives for MPEG PSI/SI sections.
//!
//! This crate provides the building blocks used to encode and decode the
//! payload of table sections:
//!
//! - [`PsiBuffer`]: a big-endian, MSB-first bit cursor with a sticky error
//!   and a stack of bounded regions (read regions, write limits, deferred
//!   length fields).
//! - [`Descriptor`] and [`DescriptorList`]: opaque `(tag, payload)` records
//!   and their loop codec, including partial writes which stop at the first
//!   descriptor that does not fit.
//!
//! # Deferred length fields
//!
//! ```text
//! +----------+---------------+---------------------+
//! | reserved |    length     |       payload       |
//! |  4 bits  |    12 bits    |    length bytes     |
//! +----------+---------------+---------------------+
//!            ^ written as 0, patched on pop_state()
//! ```
//!
//! # Example
//!
//! ```rust
//! use psi_buffer::{DescriptorList, PsiBuffer};
//!
//! let mut list = DescriptorList::new();
//! list.add(0x40, b"NET".to_vec()).unwrap();
//!
//! // Encode the loop with a 12-bit length preceded by 4 reserved bits.
//! let mut buf = PsiBuffer::writer(64);
//! buf.put_u8(0x2A);
//! assert!(buf.put_descriptor_list_with_length(&list, 0, 12));
//! assert_eq!(buf.written(), &[0x2A, 0xF0, 0x05, 0x40, 0x03, b'N', b'E', b'T']);
//!
//! // Decode it back.
//! let bytes = buf.into_bytes();
//! let mut buf = PsiBuffer::reader(&bytes);
//! assert_eq!(buf.get_u8(), 0x2A);
//! let mut decoded = DescriptorList::new();
//! assert!(buf.get_descriptor_list_with_length(&mut decoded, 12));
//! assert_eq!(decoded, list);
//! ```

pub mod buffer;
pub mod descriptor;
pub mod error;
pub mod hextext;

pub use buffer::{max_value, Mode, PsiBuffer};
pub use descriptor::{Descriptor, DescriptorList, MAX_DESCRIPTOR_PAYLOAD_SIZE};
pub use error::BufferError;
