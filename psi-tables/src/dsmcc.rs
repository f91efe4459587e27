//! DSM-CC structures embedded in data broadcast tables.

use bytes::Bytes;
use psi_buffer::{DescriptorList, PsiBuffer};
use serde::{Deserialize, Serialize};

/// One entry of a DSM-CC compatibilityDescriptor().
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityEntry {
    pub descriptor_type: u8,
    pub specifier_type: u8,
    /// 24 bits, usually an IEEE OUI.
    pub specifier_data: u32,
    pub model: u16,
    pub version: u16,
    pub sub_descriptors: DescriptorList,
}

impl Default for CompatibilityEntry {
    fn default() -> Self {
        CompatibilityEntry {
            descriptor_type: 0,
            // IEEE OUI
            specifier_type: 0x01,
            specifier_data: 0,
            model: 0,
            version: 0,
            sub_descriptors: DescriptorList::new(),
        }
    }
}

/// DSM-CC compatibilityDescriptor(), as defined in ISO/IEC 13818-6.
///
/// ```text
/// compatibilityDescriptorLength   16
/// descriptorCount                 16
/// for each entry:
///     descriptorType               8
///     descriptorLength             8
///     specifierType                8
///     specifierData               24
///     model                       16
///     version                     16
///     subDescriptorCount           8
///     subDescriptor()...
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompatibilityDescriptor {
    pub entries: Vec<CompatibilityEntry>,
}

impl CompatibilityDescriptor {
    pub fn write(&self, buf: &mut PsiBuffer) {
        if self.entries.len() > u16::MAX as usize {
            buf.set_shape_error(format!(
                "{} compatibility entries, max: 65535",
                self.entries.len()
            ));
            return;
        }
        buf.push_write_length(16);
        buf.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            if entry.sub_descriptors.len() > u8::MAX as usize {
                buf.set_shape_error(format!(
                    "{} sub-descriptors in compatibility entry, max: 255",
                    entry.sub_descriptors.len()
                ));
                break;
            }
            buf.put_u8(entry.descriptor_type);
            buf.push_write_length(8);
            buf.put_u8(entry.specifier_type);
            buf.put_u24(entry.specifier_data);
            buf.put_u16(entry.model);
            buf.put_u16(entry.version);
            buf.put_u8(entry.sub_descriptors.len() as u8);
            buf.put_descriptor_list(&entry.sub_descriptors, 0);
            buf.pop_state();
        }
        buf.pop_state();
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        let mut desc = CompatibilityDescriptor::default();
        buf.push_read_size_from_length(16);
        let count = buf.get_u16();
        for _ in 0..count {
            if buf.has_error() {
                break;
            }
            let mut entry = CompatibilityEntry {
                descriptor_type: buf.get_u8(),
                ..Default::default()
            };
            buf.push_read_size_from_length(8);
            entry.specifier_type = buf.get_u8();
            entry.specifier_data = buf.get_u24();
            entry.model = buf.get_u16();
            entry.version = buf.get_u16();
            let sub_count = buf.get_u8() as usize;
            let remaining = buf.remaining_bytes();
            buf.get_descriptor_list(&mut entry.sub_descriptors, remaining);
            if !buf.has_error() && entry.sub_descriptors.len() != sub_count {
                buf.set_shape_error(format!(
                    "{} sub-descriptors announced, {} found",
                    sub_count,
                    entry.sub_descriptors.len()
                ));
            }
            buf.pop_state();
            desc.entries.push(entry);
        }
        if !buf.pop_state() && !buf.has_error() {
            buf.set_shape_error("extra bytes after compatibility entries");
        }
        desc
    }
}

/// DSM-CC Tap() structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tap {
    pub id: u16,
    #[serde(rename = "use")]
    pub tap_use: u16,
    pub association_tag: u16,
    #[serde(with = "psi_buffer::hextext")]
    pub selector: Bytes,
}

impl Tap {
    pub fn write(&self, buf: &mut PsiBuffer) {
        buf.put_u16(self.id);
        buf.put_u16(self.tap_use);
        buf.put_u16(self.association_tag);
        buf.put_bytes_with_length(&self.selector, 8);
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        Tap {
            id: buf.get_u16(),
            tap_use: buf.get_u16(),
            association_tag: buf.get_u16(),
            selector: buf.get_bytes_with_length(8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompatibilityDescriptor {
        let mut subs = DescriptorList::new();
        subs.add(0x01, vec![0xAA, 0xBB]).unwrap();
        CompatibilityDescriptor {
            entries: vec![
                CompatibilityEntry {
                    descriptor_type: 0x02,
                    specifier_data: 0x00015A,
                    model: 0x1234,
                    version: 0x0005,
                    sub_descriptors: subs,
                    ..Default::default()
                },
                CompatibilityEntry::default(),
            ],
        }
    }

    #[test]
    fn test_compatibility_descriptor_layout() {
        let mut buf = PsiBuffer::writer(64);
        sample().write(&mut buf);
        assert!(buf.check().is_ok());
        assert_eq!(
            buf.written(),
            &[
                0x00, 0x1C, // length
                0x00, 0x02, // count
                0x02, 0x0D, 0x01, 0x00, 0x01, 0x5A, 0x12, 0x34, 0x00, 0x05, 0x01, 0x01, 0x02, 0xAA, 0xBB,
                0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ][..]
        );

        let bytes = buf.into_bytes();
        let mut buf = PsiBuffer::reader(&bytes);
        assert_eq!(CompatibilityDescriptor::parse(&mut buf), sample());
        assert!(buf.check().is_ok());
        assert!(buf.end_of_read());
    }

    #[test]
    fn test_empty_compatibility_descriptor() {
        let mut buf = PsiBuffer::writer(8);
        CompatibilityDescriptor::default().write(&mut buf);
        assert_eq!(buf.written(), &[0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_sub_descriptor_count_mismatch() {
        let data = [
            0x00, 0x0D, 0x00, 0x01, // length, count
            0x02, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, // 2 announced, none present
        ];
        let mut buf = PsiBuffer::reader(&data);
        CompatibilityDescriptor::parse(&mut buf);
        assert!(matches!(buf.error(), Some(psi_buffer::BufferError::Shape(_))));
    }

    #[test]
    fn test_tap() {
        let tap = Tap {
            id: 1,
            tap_use: 0x0016,
            association_tag: 0x00FF,
            selector: Bytes::from_static(&[9, 8, 7]),
        };
        let mut buf = PsiBuffer::writer(16);
        tap.write(&mut buf);
        assert_eq!(buf.written(), &[0, 1, 0, 0x16, 0, 0xFF, 3, 9, 8, 7]);
        let bytes = buf.into_bytes();
        assert_eq!(Tap::parse(&mut PsiBuffer::reader(&bytes)), tap);
    }
}
