//! Descriptors and descriptor loops.
//!
//! A descriptor is a `(tag, length, payload)` record:
//!
//! ```text
//! +--------+--------+---------------------+
//! |  tag   | length |       payload       |
//! | 8 bits | 8 bits |    length bytes     |
//! +--------+--------+---------------------+
//! ```
//!
//! Descriptors are kept as opaque payloads, so unknown tags round-trip
//! byte-for-byte. Typed views of well-known descriptors are built on top of
//! this representation.

use std::ops::Index;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::buffer::{max_value, PsiBuffer};
use crate::error::BufferError;

/// Maximum payload size of a descriptor.
pub const MAX_DESCRIPTOR_PAYLOAD_SIZE: usize = 255;

/// One descriptor, tag and raw payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRepr", into = "DescriptorRepr")]
pub struct Descriptor {
    tag: u8,
    payload: Bytes,
}

#[derive(Serialize, Deserialize)]
struct DescriptorRepr {
    tag: u8,
    #[serde(with = "crate::hextext", default)]
    payload: Bytes,
}

impl TryFrom<DescriptorRepr> for Descriptor {
    type Error = BufferError;

    fn try_from(repr: DescriptorRepr) -> Result<Self, Self::Error> {
        Descriptor::new(repr.tag, repr.payload)
    }
}

impl From<Descriptor> for DescriptorRepr {
    fn from(desc: Descriptor) -> Self {
        DescriptorRepr {
            tag: desc.tag,
            payload: desc.payload,
        }
    }
}

impl Descriptor {
    /// Build a descriptor. The payload must not exceed 255 bytes.
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Result<Self, BufferError> {
        let payload = payload.into();
        if payload.len() > MAX_DESCRIPTOR_PAYLOAD_SIZE {
            return Err(BufferError::DescriptorTooLong {
                tag,
                length: payload.len(),
            });
        }
        Ok(Descriptor { tag, payload })
    }

    /// Descriptor tag.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Raw payload, without tag and length.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Serialized size, including tag and length.
    pub fn size(&self) -> usize {
        2 + self.payload.len()
    }
}

/// An ordered list of descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorList {
    descs: Vec<Descriptor>,
}

impl DescriptorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn clear(&mut self) {
        self.descs.clear();
    }

    /// Append a descriptor.
    pub fn push(&mut self, desc: Descriptor) {
        self.descs.push(desc);
    }

    /// Build and append a descriptor from a tag and a payload.
    pub fn add(&mut self, tag: u8, payload: impl Into<Bytes>) -> Result<(), BufferError> {
        self.descs.push(Descriptor::new(tag, payload)?);
        Ok(())
    }

    /// Append all descriptors of another list.
    pub fn extend_from(&mut self, other: &DescriptorList) {
        self.descs.extend(other.descs.iter().cloned());
    }

    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        self.descs.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Descriptor> {
        self.descs.iter()
    }

    /// Index of the first descriptor with `tag`, starting at `start`.
    pub fn search(&self, tag: u8, start: usize) -> Option<usize> {
        self.descs
            .iter()
            .skip(start)
            .position(|d| d.tag == tag)
            .map(|pos| pos + start)
    }

    /// Subset of the descriptors matching `keep`, in original order.
    pub fn filtered<F>(&self, mut keep: F) -> DescriptorList
    where
        F: FnMut(&Descriptor) -> bool,
    {
        self.descs.iter().filter(|d| keep(d)).cloned().collect()
    }

    /// Serialized size of the descriptors from index `start`.
    pub fn binary_size(&self, start: usize) -> usize {
        self.descs.iter().skip(start).map(Descriptor::size).sum()
    }
}

impl Index<usize> for DescriptorList {
    type Output = Descriptor;

    fn index(&self, index: usize) -> &Descriptor {
        &self.descs[index]
    }
}

impl FromIterator<Descriptor> for DescriptorList {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        DescriptorList {
            descs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DescriptorList {
    type Item = &'a Descriptor;
    type IntoIter = std::slice::Iter<'a, Descriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descs.iter()
    }
}

// ----------------------------------------------------------------------
// Descriptor loops in a PSI buffer.
// ----------------------------------------------------------------------

impl PsiBuffer {
    /// Read `length` bytes of descriptors and append them to `list`.
    ///
    /// A descriptor announcing more bytes than left in the loop is an error,
    /// it is not partially added.
    pub fn get_descriptor_list(&mut self, list: &mut DescriptorList, length: usize) -> bool {
        if self.has_error() {
            return false;
        }
        self.push_read_size(length);
        while !self.has_error() && !self.end_of_read() {
            let available = self.remaining_bytes();
            if available < 2 {
                let tag = self.get_u8();
                self.set_error(BufferError::TruncatedDescriptor {
                    tag,
                    length: 0,
                    available: 0,
                });
                break;
            }
            let tag = self.get_u8();
            let size = self.get_u8() as usize;
            if size > self.remaining_bytes() {
                self.set_error(BufferError::TruncatedDescriptor {
                    tag,
                    length: size,
                    available: self.remaining_bytes(),
                });
                break;
            }
            let payload = self.get_bytes(size);
            if !self.has_error() {
                list.descs.push(Descriptor { tag, payload });
            }
        }
        self.pop_state();
        !self.has_error()
    }

    /// Read a descriptor loop preceded by a `length_bits` length field.
    ///
    /// When the cursor is byte-aligned and the length is shorter than 16 bits,
    /// the length is preceded by reserved bits up to 16 bits.
    pub fn get_descriptor_list_with_length(
        &mut self,
        list: &mut DescriptorList,
        length_bits: usize,
    ) -> bool {
        if self.is_byte_aligned() && length_bits < 16 {
            self.skip_reserved_bits(16 - length_bits);
        }
        let length = self.get_bits(length_bits) as usize;
        if !self.has_error() && !self.is_byte_aligned() {
            self.set_error(BufferError::Unaligned(self.bit_position()));
        }
        self.get_descriptor_list(list, length)
    }

    /// Write as many descriptors as possible from index `start`.
    ///
    /// Stops at the first descriptor which does not fit. Returns the index of
    /// the first descriptor which was not written.
    pub fn put_partial_descriptor_list(&mut self, list: &DescriptorList, start: usize) -> usize {
        let mut next = start.min(list.len());
        if self.has_error() {
            return next;
        }
        if !self.is_byte_aligned() {
            self.set_error(BufferError::Unaligned(self.bit_position()));
            return next;
        }
        while next < list.len() && list[next].size() <= self.remaining_bytes() {
            let desc = &list[next];
            self.put_u8(desc.tag);
            self.put_u8(desc.payload.len() as u8);
            self.put_bytes(&desc.payload);
            if self.has_error() {
                break;
            }
            next += 1;
        }
        next
    }

    /// Write all descriptors from index `start`, or nothing and an error if
    /// they do not fit.
    pub fn put_descriptor_list(&mut self, list: &DescriptorList, start: usize) -> bool {
        let size = list.binary_size(start);
        if !self.has_error() && size > self.remaining_bytes() {
            self.set_error(BufferError::WriteOverflow {
                offset: self.bit_position(),
                requested: size * 8,
                available: self.remaining_bits(),
            });
        }
        if self.has_error() {
            return false;
        }
        self.put_partial_descriptor_list(list, start) == list.len()
    }

    /// Write a length field followed by as many descriptors as possible from
    /// index `start`. Returns the index of the first descriptor not written.
    ///
    /// When the cursor is byte-aligned and the length is shorter than 16 bits,
    /// reserved bits (set to 1) are written first, up to 16 bits.
    pub fn put_partial_descriptor_list_with_length(
        &mut self,
        list: &DescriptorList,
        start: usize,
        length_bits: usize,
    ) -> usize {
        let start = start.min(list.len());
        if self.has_error() {
            return start;
        }
        if length_bits == 0 || length_bits > 16 {
            self.set_shape_error(format!("invalid descriptor loop length size: {} bits", length_bits));
            return start;
        }
        let header_bits = if self.is_byte_aligned() { 16 } else { length_bits };
        if self.remaining_bits() < header_bits {
            self.set_error(BufferError::WriteOverflow {
                offset: self.bit_position(),
                requested: header_bits,
                available: self.remaining_bits(),
            });
            return start;
        }
        if self.is_byte_aligned() {
            self.put_reserved(16 - length_bits);
        }
        self.push_write_length(length_bits);
        // Never write more than the length field can describe.
        self.push_write_size(max_value(length_bits) as usize);
        let next = self.put_partial_descriptor_list(list, start);
        self.pop_state();
        self.pop_state();
        next
    }

    /// Write a length field followed by all descriptors from index `start`,
    /// or nothing and an error if they do not fit.
    pub fn put_descriptor_list_with_length(
        &mut self,
        list: &DescriptorList,
        start: usize,
        length_bits: usize,
    ) -> bool {
        let header_bits = if self.is_byte_aligned() { 16 } else { length_bits };
        let size = list.binary_size(start);
        if !self.has_error() && header_bits + size * 8 > self.remaining_bits() {
            self.set_error(BufferError::WriteOverflow {
                offset: self.bit_position(),
                requested: header_bits + size * 8,
                available: self.remaining_bits(),
            });
        }
        if !self.has_error() && size as u64 > max_value(length_bits) {
            self.set_error(BufferError::LengthOverflow {
                length: size,
                bits: length_bits,
            });
        }
        if self.has_error() {
            return false;
        }
        self.put_partial_descriptor_list_with_length(list, start, length_bits) == list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list(count: usize, payload_size: usize) -> DescriptorList {
        (0..count)
            .map(|i| Descriptor::new(0x80 + i as u8, vec![i as u8; payload_size]).unwrap())
            .collect()
    }

    #[test]
    fn test_descriptor_too_long() {
        assert!(Descriptor::new(0x40, vec![0u8; 255]).is_ok());
        assert_eq!(
            Descriptor::new(0x40, vec![0u8; 256]),
            Err(BufferError::DescriptorTooLong {
                tag: 0x40,
                length: 256
            })
        );
    }

    #[test]
    fn test_parse_descriptor_loop() {
        let data = [
            0x48, 0x02, 0xAA, 0xBB, // service descriptor, length 2
            0x40, 0x03, 0xCC, 0xDD, 0xEE, // network name, length 3
        ];
        let mut buf = PsiBuffer::reader(&data);
        let mut list = DescriptorList::new();
        assert!(buf.get_descriptor_list(&mut list, data.len()));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].tag(), 0x48);
        assert_eq!(&list[0].payload()[..], &[0xAA, 0xBB]);
        assert_eq!(list[1].tag(), 0x40);
        assert_eq!(&list[1].payload()[..], &[0xCC, 0xDD, 0xEE]);
    }

    #[test]
    fn test_unknown_tag_round_trip() {
        let data = [0xF0, 0x05, 0x10, 0x20, 0x30, 0x40, 0x50, 0x00, 0x00];
        let mut buf = PsiBuffer::reader(&data);
        let mut list = DescriptorList::new();
        assert!(buf.get_descriptor_list(&mut list, data.len()));

        let mut out = PsiBuffer::writer(32);
        assert!(out.put_descriptor_list(&list, 0));
        assert_eq!(out.written(), &data[..]);
    }

    #[test]
    fn test_truncated_trailing_descriptor() {
        let data = [0x48, 0x01, 0xAA, 0x40, 0x05, 0x01, 0x02];
        let mut buf = PsiBuffer::reader(&data);
        let mut list = DescriptorList::new();
        assert!(!buf.get_descriptor_list(&mut list, data.len()));
        assert_eq!(list.len(), 1);
        assert_eq!(
            buf.error(),
            Some(&BufferError::TruncatedDescriptor {
                tag: 0x40,
                length: 5,
                available: 2
            })
        );
    }

    #[test]
    fn test_loop_with_twelve_bits_length() {
        let list = sample_list(2, 1);
        let mut buf = PsiBuffer::writer(16);
        assert!(buf.put_descriptor_list_with_length(&list, 0, 12));
        assert_eq!(buf.written(), &[0xF0, 0x06, 0x80, 0x01, 0x00, 0x81, 0x01, 0x01]);

        let bytes = buf.into_bytes();
        let mut buf = PsiBuffer::reader(&bytes);
        let mut decoded = DescriptorList::new();
        assert!(buf.get_descriptor_list_with_length(&mut decoded, 12));
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_partial_list_across_two_areas() {
        // 10 descriptors of 10 bytes, room for 6 of them after the length field.
        let list = sample_list(10, 8);
        let mut first = PsiBuffer::writer(2 + 6 * 10 + 5);
        let next = first.put_partial_descriptor_list_with_length(&list, 0, 16);
        assert_eq!(next, 6);
        assert!(first.check().is_ok());

        let mut second = PsiBuffer::writer(200);
        let last = second.put_partial_descriptor_list_with_length(&list, next, 16);
        assert_eq!(last, 10);

        let mut decoded = DescriptorList::new();
        for area in [first.into_bytes(), second.into_bytes()] {
            let mut buf = PsiBuffer::reader(&area);
            assert!(buf.get_descriptor_list_with_length(&mut decoded, 16));
        }
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_full_list_does_not_fit() {
        let list = sample_list(3, 10);
        let mut buf = PsiBuffer::writer(20);
        assert!(!buf.put_descriptor_list_with_length(&list, 0, 16));
        assert!(buf.error().map(BufferError::is_write_overflow).unwrap_or(false));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_search_and_filter() {
        let mut list = DescriptorList::new();
        list.add(0x48, vec![1]).unwrap();
        list.add(0x40, vec![2]).unwrap();
        list.add(0x48, vec![3]).unwrap();
        assert_eq!(list.search(0x48, 0), Some(0));
        assert_eq!(list.search(0x48, 1), Some(2));
        assert_eq!(list.search(0x99, 0), None);

        let services = list.filtered(|d| d.tag() == 0x48);
        assert_eq!(services.len(), 2);
        assert_eq!(&services[1].payload()[..], &[3]);
        assert_eq!(list.binary_size(1), 6);
    }

    #[test]
    fn test_descriptor_hex_text() {
        let desc = Descriptor::new(0x40, vec![0x41, 0x42]).unwrap();
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"tag":64,"payload":"4142"}"#);
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);

        let too_long = format!(r#"{{"tag":64,"payload":"{}"}}"#, "00".repeat(256));
        assert!(serde_json::from_str::<Descriptor>(&too_long).is_err());
    }
}
