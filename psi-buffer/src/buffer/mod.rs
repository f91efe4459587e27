//! Bit-level cursor over a section payload.
//!
//! A [`PsiBuffer`] is either a reader or a writer. Integers are big-endian and
//! bit fields are packed MSB-first. All operations are checked against the
//! currently active bound (see the [`state`] module for nested regions) and
//! report failures through a sticky error instead of returning a result per
//! call:
//!
//! ```text
//! reads after an error   -> return 0 / empty, cursor does not move
//! writes after an error  -> ignored, cursor does not move
//! ```
//!
//! Callers perform a long sequence of unchecked operations and check
//! [`PsiBuffer::error`] once at the end.

pub mod state;

use bytes::{Bytes, BytesMut};

use crate::error::BufferError;
use state::SavedState;

/// Direction of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sequential decoding of existing data.
    Read,
    /// Sequential encoding into a fixed-capacity area.
    Write,
}

/// Cursor position and active bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    /// Byte offset of the cursor.
    pub(crate) byte: usize,
    /// Bit offset inside the current byte, 0 is the msb.
    pub(crate) bit: usize,
    /// Exclusive byte bound of the active region.
    pub(crate) end: usize,
}

impl Cursor {
    fn bit_offset(&self) -> usize {
        self.byte * 8 + self.bit
    }
}

/// Largest value representable on `bits` bits.
pub fn max_value(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Bit-level reader or writer with a stack of bounded regions.
#[derive(Debug, Clone)]
pub struct PsiBuffer {
    data: BytesMut,
    mode: Mode,
    pub(crate) cursor: Cursor,
    pub(crate) saved: Vec<SavedState>,
    error: Option<BufferError>,
}

impl PsiBuffer {
    /// Create a reader over a copy of `data`.
    pub fn reader(data: &[u8]) -> Self {
        PsiBuffer {
            data: BytesMut::from(data),
            mode: Mode::Read,
            cursor: Cursor {
                byte: 0,
                bit: 0,
                end: data.len(),
            },
            saved: Vec::new(),
            error: None,
        }
    }

    /// Create a writer able to hold at most `capacity` bytes.
    pub fn writer(capacity: usize) -> Self {
        PsiBuffer {
            data: BytesMut::zeroed(capacity),
            mode: Mode::Write,
            cursor: Cursor {
                byte: 0,
                bit: 0,
                end: capacity,
            },
            saved: Vec::new(),
            error: None,
        }
    }

    /// Direction of this buffer.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Total size of the underlying memory area.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    // ------------------------------------------------------------------
    // Error state
    // ------------------------------------------------------------------

    /// First error met since creation or since the last [`clear_error`](Self::clear_error).
    pub fn error(&self) -> Option<&BufferError> {
        self.error.as_ref()
    }

    /// Returns true if an error is set.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert the error state into a result.
    pub fn check(&self) -> Result<(), BufferError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Clear the error state.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Record an error. Only the first one is kept.
    pub fn set_error(&mut self, err: BufferError) {
        if self.error.is_none() {
            log::trace!("PSI buffer error at bit {}: {}", self.cursor.bit_offset(), err);
            self.error = Some(err);
        }
    }

    /// Record a format-specific shape error.
    pub fn set_shape_error(&mut self, message: impl Into<String>) {
        self.set_error(BufferError::Shape(message.into()));
    }

    // ------------------------------------------------------------------
    // Position
    // ------------------------------------------------------------------

    /// Byte offset of the cursor (a partially used byte is not counted).
    pub fn position(&self) -> usize {
        self.cursor.byte
    }

    /// Bit offset of the cursor from the start of the buffer.
    pub fn bit_position(&self) -> usize {
        self.cursor.bit_offset()
    }

    /// Returns true if the cursor is on a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        self.cursor.bit == 0
    }

    /// Exclusive byte bound of the active region.
    pub fn end(&self) -> usize {
        self.cursor.end
    }

    /// Number of bits left before the active bound.
    pub fn remaining_bits(&self) -> usize {
        (self.cursor.end * 8).saturating_sub(self.cursor.bit_offset())
    }

    /// Number of whole bytes left before the active bound.
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    /// Returns true if `count` bytes can still be read without error.
    pub fn can_read_bytes(&self, count: usize) -> bool {
        self.error.is_none() && self.mode == Mode::Read && self.remaining_bits() >= count * 8
    }

    /// Returns true if everything up to the active bound was read.
    pub fn end_of_read(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Move the write cursor to a byte offset, dropping any partial byte.
    pub fn write_seek(&mut self, offset: usize) {
        if self.mode != Mode::Write {
            self.set_error(BufferError::WrongMode("write seek on a read buffer"));
        } else if offset > self.cursor.end {
            self.set_error(BufferError::WriteOverflow {
                offset: offset * 8,
                requested: 0,
                available: 0,
            });
        } else {
            self.cursor.byte = offset;
            self.cursor.bit = 0;
        }
    }

    /// Bytes written so far (write mode) or the whole input (read mode).
    pub fn written(&self) -> &[u8] {
        match self.mode {
            Mode::Write => &self.data[..self.written_len()],
            Mode::Read => &self.data[..],
        }
    }

    /// Consume the buffer and return the bytes written so far.
    pub fn into_bytes(self) -> Bytes {
        let len = match self.mode {
            Mode::Write => self.written_len(),
            Mode::Read => self.data.len(),
        };
        let mut data = self.data;
        data.truncate(len);
        data.freeze()
    }

    fn written_len(&self) -> usize {
        self.cursor.byte + usize::from(self.cursor.bit > 0)
    }

    fn advance(&mut self, bits: usize) {
        let total = self.cursor.bit + bits;
        self.cursor.byte += total / 8;
        self.cursor.bit = total % 8;
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_read(&mut self, bits: usize) -> bool {
        if self.error.is_some() {
            return false;
        }
        if self.mode != Mode::Read {
            self.set_error(BufferError::WrongMode("read on a write buffer"));
            return false;
        }
        let available = self.remaining_bits();
        if bits > available {
            self.set_error(BufferError::ReadOverflow {
                offset: self.cursor.bit_offset(),
                requested: bits,
                available,
            });
            return false;
        }
        true
    }

    fn check_write(&mut self, bits: usize) -> bool {
        if self.error.is_some() {
            return false;
        }
        if self.mode != Mode::Write {
            self.set_error(BufferError::WrongMode("write on a read buffer"));
            return false;
        }
        let available = self.remaining_bits();
        if bits > available {
            self.set_error(BufferError::WriteOverflow {
                offset: self.cursor.bit_offset(),
                requested: bits,
                available,
            });
            return false;
        }
        true
    }

    fn check_aligned(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        if self.cursor.bit != 0 {
            self.set_error(BufferError::Unaligned(self.cursor.bit_offset()));
            return false;
        }
        true
    }

    fn check_width(&mut self, bits: usize) -> bool {
        if bits > 64 {
            self.set_shape_error(format!("{} bits field is wider than 64 bits", bits));
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Raw bit access, no checks.
    // ------------------------------------------------------------------

    fn read_bits_unchecked(&mut self, bits: usize) -> u64 {
        let mut value = 0u64;
        let mut left = bits;
        while left > 0 {
            let in_byte = 8 - self.cursor.bit;
            let take = in_byte.min(left);
            let shift = in_byte - take;
            let chunk = (u64::from(self.data[self.cursor.byte]) >> shift) & max_value(take);
            value = (value << take) | chunk;
            left -= take;
            self.advance(take);
        }
        value
    }

    pub(crate) fn write_bits_unchecked(&mut self, value: u64, bits: usize) {
        let mut left = bits;
        while left > 0 {
            let in_byte = 8 - self.cursor.bit;
            let take = in_byte.min(left);
            let shift = in_byte - take;
            let chunk = ((value >> (left - take)) & max_value(take)) as u8;
            let mask = (max_value(take) as u8) << shift;
            let byte = &mut self.data[self.cursor.byte];
            *byte = (*byte & !mask) | (chunk << shift);
            left -= take;
            self.advance(take);
        }
    }

    // ------------------------------------------------------------------
    // Bit fields and integers
    // ------------------------------------------------------------------

    /// Read a field of `bits` bits (0 to 64).
    pub fn get_bits(&mut self, bits: usize) -> u64 {
        if !self.check_width(bits) || !self.check_read(bits) {
            return 0;
        }
        self.read_bits_unchecked(bits)
    }

    /// Write `value` on `bits` bits. A value wider than the field is a shape
    /// error and nothing is written.
    pub fn put_bits(&mut self, value: u64, bits: usize) {
        if !self.check_width(bits) || self.has_error() {
            return;
        }
        if value > max_value(bits) {
            self.set_shape_error(format!("value {} does not fit in {} bits", value, bits));
            return;
        }
        if self.check_write(bits) {
            self.write_bits_unchecked(value, bits);
        }
    }

    /// Skip `bits` bits.
    pub fn skip_bits(&mut self, bits: usize) {
        if self.check_read(bits) {
            self.advance(bits);
        }
    }

    /// Skip reserved bits. Their value is not checked.
    pub fn skip_reserved_bits(&mut self, bits: usize) {
        self.skip_bits(bits);
    }

    /// Write `bits` reserved bits set to 1.
    pub fn put_reserved(&mut self, bits: usize) {
        if self.check_write(bits) {
            let mut left = bits;
            while left > 0 {
                let take = left.min(64);
                self.write_bits_unchecked(u64::MAX, take);
                left -= take;
            }
        }
    }

    /// Write `bits` reserved bits set to 0.
    pub fn put_reserved_zero(&mut self, bits: usize) {
        if self.check_write(bits) {
            let mut left = bits;
            while left > 0 {
                let take = left.min(64);
                self.write_bits_unchecked(0, take);
                left -= take;
            }
        }
    }

    /// Read one bit.
    pub fn get_bool(&mut self) -> bool {
        self.get_bits(1) != 0
    }

    /// Write one bit.
    pub fn put_bool(&mut self, value: bool) {
        self.put_bits(u64::from(value), 1);
    }

    pub fn get_u8(&mut self) -> u8 {
        self.get_bits(8) as u8
    }

    pub fn get_u16(&mut self) -> u16 {
        self.get_bits(16) as u16
    }

    /// Read a 24-bit integer.
    pub fn get_u24(&mut self) -> u32 {
        self.get_bits(24) as u32
    }

    pub fn get_u32(&mut self) -> u32 {
        self.get_bits(32) as u32
    }

    pub fn get_u64(&mut self) -> u64 {
        self.get_bits(64)
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put_bits(u64::from(value), 8);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.put_bits(u64::from(value), 16);
    }

    /// Write a 24-bit integer. Values above 0xFFFFFF are a shape error.
    pub fn put_u24(&mut self, value: u32) {
        self.put_bits(u64::from(value), 24);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put_bits(u64::from(value), 32);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.put_bits(value, 64);
    }

    // ------------------------------------------------------------------
    // Binary coded decimal
    // ------------------------------------------------------------------

    /// Read a BCD number of `digits` digits, 4 bits per digit.
    pub fn get_bcd(&mut self, digits: usize) -> u64 {
        if digits > 19 {
            self.set_shape_error(format!("{} BCD digits do not fit in 64 bits", digits));
            return 0;
        }
        if !self.check_read(4 * digits) {
            return 0;
        }
        let mut value = 0u64;
        for _ in 0..digits {
            let digit = self.read_bits_unchecked(4);
            if digit > 9 {
                self.set_shape_error(format!("invalid BCD digit 0x{:X}", digit));
                return 0;
            }
            value = value * 10 + digit;
        }
        value
    }

    /// Write `value` as a BCD number of `digits` digits.
    pub fn put_bcd(&mut self, value: u64, digits: usize) {
        let fits = match 10u64.checked_pow(digits as u32) {
            Some(limit) => value < limit,
            None => digits <= 20,
        };
        if !fits || digits > 19 {
            self.set_shape_error(format!("{} does not fit in {} BCD digits", value, digits));
            return;
        }
        if !self.check_write(4 * digits) {
            return;
        }
        for index in (0..digits).rev() {
            let digit = (value / 10u64.pow(index as u32)) % 10;
            self.write_bits_unchecked(digit, 4);
        }
    }

    // ------------------------------------------------------------------
    // Byte blocks and text
    // ------------------------------------------------------------------

    /// Read `size` bytes. The cursor must be byte-aligned.
    pub fn get_bytes(&mut self, size: usize) -> Bytes {
        if !self.check_aligned() || !self.check_read(size * 8) {
            return Bytes::new();
        }
        let start = self.cursor.byte;
        self.cursor.byte += size;
        Bytes::copy_from_slice(&self.data[start..start + size])
    }

    /// Read all bytes up to the active bound.
    pub fn get_remaining_bytes(&mut self) -> Bytes {
        let size = self.remaining_bytes();
        self.get_bytes(size)
    }

    /// Write a block of bytes. The cursor must be byte-aligned.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if !self.check_aligned() || !self.check_write(bytes.len() * 8) {
            return;
        }
        let start = self.cursor.byte;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursor.byte += bytes.len();
    }

    /// Read a byte block preceded by a `length_bits` length field.
    pub fn get_bytes_with_length(&mut self, length_bits: usize) -> Bytes {
        let length = self.get_bits(length_bits) as usize;
        if self.has_error() {
            return Bytes::new();
        }
        self.get_bytes(length)
    }

    /// Write a byte block preceded by a `length_bits` length field.
    pub fn put_bytes_with_length(&mut self, bytes: &[u8], length_bits: usize) {
        if self.has_error() || !self.check_width(length_bits) {
            return;
        }
        if bytes.len() as u64 > max_value(length_bits) {
            self.set_error(BufferError::LengthOverflow {
                length: bytes.len(),
                bits: length_bits,
            });
            return;
        }
        if !self.check_write(length_bits + bytes.len() * 8) {
            return;
        }
        self.write_bits_unchecked(bytes.len() as u64, length_bits);
        self.put_bytes(bytes);
    }

    /// Read a UTF-8 string preceded by a `length_bits` length field.
    pub fn get_string_with_length(&mut self, length_bits: usize) -> String {
        let bytes = self.get_bytes_with_length(length_bits);
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => text,
            Err(err) => {
                self.set_shape_error(format!("invalid UTF-8 text: {}", err));
                String::new()
            }
        }
    }

    /// Write a UTF-8 string preceded by a `length_bits` length field.
    pub fn put_string_with_length(&mut self, text: &str, length_bits: usize) {
        self.put_bytes_with_length(text.as_bytes(), length_bits);
    }

    /// Read an ISO 639 language code (3 ASCII characters).
    pub fn get_language_code(&mut self) -> String {
        let bytes = self.get_bytes(3);
        if self.has_error() {
            return String::new();
        }
        if !bytes.is_ascii() {
            self.set_shape_error("non-ASCII language code");
            return String::new();
        }
        bytes.iter().map(|&b| b as char).collect()
    }

    /// Write an ISO 639 language code, which must be exactly 3 ASCII characters.
    pub fn put_language_code(&mut self, code: &str) {
        if code.len() != 3 || !code.is_ascii() {
            self.set_shape_error(format!("invalid language code {:?}", code));
            return;
        }
        self.put_bytes(code.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_bits_and_flag_make_one_byte() {
        let mut buf = PsiBuffer::writer(4);
        buf.put_bits(0x7F, 7);
        buf.put_bool(true);
        assert!(buf.is_byte_aligned());
        assert_eq!(buf.written(), &[0xFF]);

        let mut buf = PsiBuffer::reader(&[0xFF]);
        assert_eq!(buf.get_bits(7), 0x7F);
        assert!(buf.get_bool());
        assert!(buf.check().is_ok());
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = PsiBuffer::writer(32);
        buf.put_u8(0x01);
        buf.put_u16(0x0203);
        buf.put_u24(0x040506);
        buf.put_u32(0x0708090A);
        buf.put_u64(0x0B0C0D0E0F101112);
        assert_eq!(buf.position(), 18);
        let bytes = buf.into_bytes();
        assert_eq!(&bytes[..], &(1u8..=0x12).collect::<Vec<u8>>()[..]);

        let mut buf = PsiBuffer::reader(&bytes);
        assert_eq!(buf.get_u8(), 0x01);
        assert_eq!(buf.get_u16(), 0x0203);
        assert_eq!(buf.get_u24(), 0x040506);
        assert_eq!(buf.get_u32(), 0x0708090A);
        assert_eq!(buf.get_u64(), 0x0B0C0D0E0F101112);
        assert!(buf.end_of_read());
    }

    #[test]
    fn test_bit_fields_across_bytes() {
        let mut buf = PsiBuffer::writer(4);
        buf.put_bits(0x5, 3);
        buf.put_bits(0x1ABC, 13);
        buf.put_reserved(4);
        buf.put_bits(0x3, 4);
        assert_eq!(buf.written(), &[0xBA, 0xBC, 0xF3]);

        let mut buf = PsiBuffer::reader(&[0xBA, 0xBC, 0xF3]);
        assert_eq!(buf.get_bits(3), 0x5);
        assert_eq!(buf.get_bits(13), 0x1ABC);
        buf.skip_reserved_bits(4);
        assert_eq!(buf.get_bits(4), 0x3);
        assert!(!buf.has_error());
    }

    #[test]
    fn test_sticky_read_error() {
        let mut buf = PsiBuffer::reader(&[0x12, 0x34]);
        assert_eq!(buf.get_u32(), 0);
        assert!(matches!(buf.error(), Some(BufferError::ReadOverflow { .. })));
        // No partial read: the cursor did not move, later reads are no-ops.
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.get_u8(), 0);
        assert_eq!(buf.get_bytes(1), Bytes::new());

        buf.clear_error();
        assert_eq!(buf.get_u8(), 0x12);
    }

    #[test]
    fn test_sticky_write_error() {
        let mut buf = PsiBuffer::writer(3);
        buf.put_u16(0xAAAA);
        buf.put_u16(0xBBBB);
        assert!(buf.error().map(BufferError::is_write_overflow).unwrap_or(false));
        buf.put_u8(0xCC);
        assert_eq!(buf.written(), &[0xAA, 0xAA]);
    }

    #[test]
    fn test_wrong_mode() {
        let mut buf = PsiBuffer::writer(8);
        buf.get_u8();
        assert!(matches!(buf.error(), Some(BufferError::WrongMode(_))));
    }

    #[test]
    fn test_bcd() {
        let mut buf = PsiBuffer::writer(8);
        buf.put_bcd(1234, 4);
        buf.put_bcd(9876543, 7);
        buf.put_bits(0xA, 4);
        assert_eq!(buf.written(), &[0x12, 0x34, 0x98, 0x76, 0x54, 0x3A]);

        let mut buf = PsiBuffer::reader(&[0x12, 0x34, 0x98, 0x76, 0x54, 0x3A]);
        assert_eq!(buf.get_bcd(4), 1234);
        assert_eq!(buf.get_bcd(7), 9876543);
        assert_eq!(buf.get_bits(4), 0xA);
    }

    #[test]
    fn test_bcd_errors() {
        let mut buf = PsiBuffer::writer(8);
        buf.put_bcd(12345, 4);
        assert!(matches!(buf.error(), Some(BufferError::Shape(_))));

        let mut buf = PsiBuffer::reader(&[0x1F]);
        assert_eq!(buf.get_bcd(2), 0);
        assert!(matches!(buf.error(), Some(BufferError::Shape(_))));
    }

    #[test]
    fn test_value_wider_than_field() {
        let mut buf = PsiBuffer::writer(4);
        buf.put_bits(0x3, 4);
        buf.put_bits(0x1000, 12);
        assert!(matches!(buf.error(), Some(BufferError::Shape(_))));
        assert_eq!(buf.bit_position(), 4);

        let mut buf = PsiBuffer::writer(4);
        buf.put_u24(0x0100_0000);
        assert!(matches!(buf.error(), Some(BufferError::Shape(_))));
        assert_eq!(buf.bit_position(), 0);

        let mut buf = PsiBuffer::writer(4);
        buf.put_bits(0xFFF, 12);
        buf.put_u24(0x00FF_FFFF);
        assert!(buf.check().is_ok());
    }

    #[test]
    fn test_bytes_with_length() {
        let mut buf = PsiBuffer::writer(16);
        buf.put_bytes_with_length(b"abc", 8);
        buf.put_string_with_length("xy", 16);
        buf.put_language_code("fra");
        assert_eq!(
            buf.written(),
            &[3, b'a', b'b', b'c', 0, 2, b'x', b'y', b'f', b'r', b'a']
        );

        let bytes = buf.into_bytes();
        let mut buf = PsiBuffer::reader(&bytes);
        assert_eq!(&buf.get_bytes_with_length(8)[..], b"abc");
        assert_eq!(buf.get_string_with_length(16), "xy");
        assert_eq!(buf.get_language_code(), "fra");
        assert!(buf.check().is_ok());
    }

    #[test]
    fn test_byte_block_too_long_for_prefix() {
        let mut buf = PsiBuffer::writer(512);
        buf.put_bytes_with_length(&[0u8; 256], 8);
        assert_eq!(
            buf.error(),
            Some(&BufferError::LengthOverflow {
                length: 256,
                bits: 8
            })
        );
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut buf = PsiBuffer::writer(4);
        buf.put_bits(1, 1);
        buf.put_bytes(&[1, 2]);
        assert_eq!(buf.error(), Some(&BufferError::Unaligned(1)));
    }

    #[test]
    fn test_invalid_language_code() {
        let mut buf = PsiBuffer::writer(4);
        buf.put_language_code("english");
        assert!(matches!(buf.error(), Some(BufferError::Shape(_))));
    }
}
