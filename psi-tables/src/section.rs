//! Long section framing and multi-section tables.
//!
//! A long section carries an 8-byte header, the payload and a CRC32:
//!
//! ```text
//! +----------+------------------+-----------+---------+-----------+-----+------+---------+-------+
//! | table_id | flags + length   | extension | version | section # | last| ...  | payload | CRC32 |
//! | 8 bits   | 1+1+2+12 bits    | 16 bits   | 2+5+1   | 8 bits    | 8   |      |         | 32    |
//! +----------+------------------+-----------+---------+-----------+-----+------+---------+-------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{TableError, TableResult};

/// Maximum size of a complete section.
pub const MAX_SECTION_SIZE: usize = 4096;

/// Size of a long section header.
pub const LONG_HEADER_SIZE: usize = 8;

/// Size of the CRC32 trailer.
pub const CRC32_SIZE: usize = 4;

/// Maximum payload of a private long section.
pub const MAX_PRIVATE_LONG_PAYLOAD_SIZE: usize = MAX_SECTION_SIZE - LONG_HEADER_SIZE - CRC32_SIZE;

/// Maximum payload of an MPEG-defined long section (1024-byte sections).
pub const MAX_PSI_LONG_PAYLOAD_SIZE: usize = 1024 - LONG_HEADER_SIZE - CRC32_SIZE;

/// Header fields shared by all sections of one table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeader {
    pub table_id: u8,
    pub private_indicator: bool,
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version: u8,
    pub is_current: bool,
}

/// One complete long section, CRC32 included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    data: Bytes,
}

impl Section {
    /// Build a long section around a payload and compute its CRC32.
    pub fn new_long(
        header: &SectionHeader,
        section_number: u8,
        last_section_number: u8,
        payload: &[u8],
    ) -> TableResult<Self> {
        if payload.len() > MAX_PRIVATE_LONG_PAYLOAD_SIZE {
            return Err(TableError::InvalidSection(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                MAX_PRIVATE_LONG_PAYLOAD_SIZE
            )));
        }
        if header.version > 31 {
            return Err(TableError::InvalidSection(format!(
                "version {} does not fit in 5 bits",
                header.version
            )));
        }
        if section_number > last_section_number {
            return Err(TableError::InvalidSection(format!(
                "section number {} after last section {}",
                section_number, last_section_number
            )));
        }

        // Everything after the section_length field.
        let section_length = 5 + payload.len() + CRC32_SIZE;
        let mut data = BytesMut::with_capacity(3 + section_length);
        data.put_u8(header.table_id);
        data.put_u16(
            0x8000
                | if header.private_indicator { 0x4000 } else { 0 }
                | 0x3000
                | section_length as u16,
        );
        data.put_u16(header.table_id_extension);
        data.put_u8(0xC0 | (header.version << 1) | u8::from(header.is_current));
        data.put_u8(section_number);
        data.put_u8(last_section_number);
        data.put_slice(payload);
        let crc = crc32_mpeg2(&data);
        data.put_u32(crc);

        Ok(Section { data: data.freeze() })
    }

    /// Parse a complete long section.
    ///
    /// Trailing bytes after the announced section length are ignored.
    pub fn from_bytes(data: impl Into<Bytes>, verify_crc: bool) -> TableResult<Self> {
        let data = data.into();
        if data.len() < 3 {
            return Err(TableError::InvalidSection("section too short for header".into()));
        }
        if data[1] & 0x80 == 0 {
            return Err(TableError::InvalidSection("not a long section".into()));
        }

        let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
        let total_length = 3 + section_length;
        if total_length < LONG_HEADER_SIZE + CRC32_SIZE {
            return Err(TableError::InvalidSection("section length too small".into()));
        }
        if total_length > MAX_SECTION_SIZE {
            return Err(TableError::InvalidSection(format!(
                "section of {} bytes exceeds {} bytes",
                total_length, MAX_SECTION_SIZE
            )));
        }
        if data.len() < total_length {
            return Err(TableError::InvalidSection(format!(
                "incomplete section data: expected {} bytes, got {}",
                total_length,
                data.len()
            )));
        }

        let section = Section {
            data: data.slice(..total_length),
        };
        if verify_crc {
            let computed = crc32_mpeg2(&section.data[..total_length - CRC32_SIZE]);
            if computed != section.crc32() {
                log::warn!(
                    "CRC32 mismatch in section 0x{:02X} #{}",
                    section.table_id(),
                    section.section_number()
                );
                return Err(TableError::Crc {
                    expected: section.crc32(),
                    computed,
                });
            }
        }
        Ok(section)
    }

    pub fn table_id(&self) -> u8 {
        self.data[0]
    }

    pub fn private_indicator(&self) -> bool {
        self.data[1] & 0x40 != 0
    }

    pub fn table_id_extension(&self) -> u16 {
        u16::from_be_bytes([self.data[3], self.data[4]])
    }

    pub fn version(&self) -> u8 {
        (self.data[5] >> 1) & 0x1F
    }

    pub fn is_current(&self) -> bool {
        self.data[5] & 0x01 != 0
    }

    pub fn section_number(&self) -> u8 {
        self.data[6]
    }

    pub fn last_section_number(&self) -> u8 {
        self.data[7]
    }

    /// Header fields of this section.
    pub fn header(&self) -> SectionHeader {
        SectionHeader {
            table_id: self.table_id(),
            private_indicator: self.private_indicator(),
            table_id_extension: self.table_id_extension(),
            version: self.version(),
            is_current: self.is_current(),
        }
    }

    /// Payload, between the long header and the CRC32.
    pub fn payload(&self) -> &[u8] {
        &self.data[LONG_HEADER_SIZE..self.data.len() - CRC32_SIZE]
    }

    /// CRC32 stored in the section.
    pub fn crc32(&self) -> u32 {
        let offset = self.data.len() - CRC32_SIZE;
        u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Check the stored CRC32 against the content.
    pub fn verify_crc(&self) -> bool {
        crc32_mpeg2(&self.data[..self.data.len() - CRC32_SIZE]) == self.crc32()
    }

    /// Total section size, header and CRC32 included.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Complete binary content.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

/// All sections of one table instance, ordered by section number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTable {
    sections: Vec<Section>,
}

impl BinaryTable {
    /// Assemble a table from sections received in any order.
    ///
    /// All sections must share table id, extension, version and last section
    /// number, and every section number up to the last one must be present.
    /// Identical duplicates are dropped.
    pub fn from_sections<I>(sections: I) -> TableResult<Self>
    where
        I: IntoIterator<Item = Section>,
    {
        let mut sections: Vec<Section> = sections.into_iter().collect();
        let first = match sections.first() {
            Some(first) => first.clone(),
            None => return Err(TableError::InvalidSection("no section".into())),
        };

        for section in &sections {
            let reason = if section.table_id() != first.table_id() {
                Some("table id differs")
            } else if section.table_id_extension() != first.table_id_extension() {
                Some("table id extension differs")
            } else if section.version() != first.version() {
                Some("version differs")
            } else if section.is_current() != first.is_current() {
                Some("current/next indicator differs")
            } else if section.private_indicator() != first.private_indicator() {
                Some("private indicator differs")
            } else if section.last_section_number() != first.last_section_number() {
                Some("last section number differs")
            } else if section.section_number() > section.last_section_number() {
                Some("section number after last section")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(TableError::InconsistentSection {
                    section: section.section_number(),
                    reason,
                });
            }
        }

        sections.sort_by_key(Section::section_number);
        let mut deduped: Vec<Section> = Vec::with_capacity(sections.len());
        for section in sections {
            match deduped.last() {
                Some(prev) if prev.section_number() == section.section_number() => {
                    if *prev != section {
                        return Err(TableError::InconsistentSection {
                            section: section.section_number(),
                            reason: "duplicate section with different content",
                        });
                    }
                }
                _ => deduped.push(section),
            }
        }

        for (expected, section) in (0..=first.last_section_number()).zip(deduped.iter()) {
            if section.section_number() != expected {
                return Err(TableError::MissingSection(expected));
            }
        }
        if deduped.len() != first.last_section_number() as usize + 1 {
            return Err(TableError::MissingSection(deduped.len() as u8));
        }

        Ok(BinaryTable { sections: deduped })
    }

    /// Parse and assemble a table from raw section bytes.
    pub fn from_raw<I, B>(raw: I, verify_crc: bool) -> TableResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let sections = raw
            .into_iter()
            .map(|data| Section::from_bytes(data, verify_crc))
            .collect::<TableResult<Vec<_>>>()?;
        Self::from_sections(sections)
    }

    pub(crate) fn from_ordered(sections: Vec<Section>) -> Self {
        BinaryTable { sections }
    }

    pub fn table_id(&self) -> u8 {
        self.sections[0].table_id()
    }

    pub fn table_id_extension(&self) -> u16 {
        self.sections[0].table_id_extension()
    }

    pub fn version(&self) -> u8 {
        self.sections[0].version()
    }

    pub fn is_current(&self) -> bool {
        self.sections[0].is_current()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Section> {
        self.sections.iter()
    }
}

impl<'a> IntoIterator for &'a BinaryTable {
    type Item = &'a Section;
    type IntoIter = std::slice::Iter<'a, Section>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.iter()
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SectionHeader {
        SectionHeader {
            table_id: 0x76,
            private_indicator: true,
            table_id_extension: 0x1234,
            version: 7,
            is_current: true,
        }
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32_mpeg2(&[]), 0xFFFFFFFF);
    }

    #[test]
    fn test_crc32_known_value() {
        // CRC-32/MPEG-2 check value.
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376E6E7);
    }

    #[test]
    fn test_build_long_section() {
        let section = Section::new_long(&header(), 0, 1, &[0xAA, 0xBB]).unwrap();
        let data = section.as_bytes();
        assert_eq!(&data[..8], &[0x76, 0xF0, 0x0B, 0x12, 0x34, 0xCF, 0x00, 0x01]);
        assert_eq!(section.size(), 14);
        assert_eq!(section.payload(), &[0xAA, 0xBB]);
        assert_eq!(section.header(), header());
        assert_eq!(section.section_number(), 0);
        assert_eq!(section.last_section_number(), 1);
        assert!(section.verify_crc());
    }

    #[test]
    fn test_parse_and_verify() {
        let section = Section::new_long(&header(), 0, 0, b"payload").unwrap();
        let parsed = Section::from_bytes(section.as_bytes().clone(), true).unwrap();
        assert_eq!(parsed, section);

        let mut corrupted = section.as_bytes().to_vec();
        corrupted[9] ^= 0xFF;
        assert!(matches!(
            Section::from_bytes(corrupted.clone(), true),
            Err(TableError::Crc { .. })
        ));
        // Without verification, the section is accepted as is.
        assert!(Section::from_bytes(corrupted, false).is_ok());
    }

    #[test]
    fn test_parse_truncated() {
        let section = Section::new_long(&header(), 0, 0, b"payload").unwrap();
        let truncated = section.as_bytes().slice(..section.size() - 1);
        assert!(matches!(
            Section::from_bytes(truncated, false),
            Err(TableError::InvalidSection(_))
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PRIVATE_LONG_PAYLOAD_SIZE + 1];
        assert!(Section::new_long(&header(), 0, 0, &payload).is_err());
        let payload = vec![0u8; MAX_PRIVATE_LONG_PAYLOAD_SIZE];
        let section = Section::new_long(&header(), 0, 0, &payload).unwrap();
        assert_eq!(section.size(), MAX_SECTION_SIZE);
    }

    #[test]
    fn test_assemble_out_of_order() {
        let s0 = Section::new_long(&header(), 0, 2, &[0]).unwrap();
        let s1 = Section::new_long(&header(), 1, 2, &[1]).unwrap();
        let s2 = Section::new_long(&header(), 2, 2, &[2]).unwrap();
        let table = BinaryTable::from_sections(vec![s2, s0.clone(), s1, s0]).unwrap();
        assert_eq!(table.section_count(), 3);
        let numbers: Vec<u8> = table.iter().map(Section::section_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(table.table_id(), 0x76);
        assert_eq!(table.table_id_extension(), 0x1234);
    }

    #[test]
    fn test_assemble_missing_section() {
        let s0 = Section::new_long(&header(), 0, 2, &[0]).unwrap();
        let s2 = Section::new_long(&header(), 2, 2, &[2]).unwrap();
        assert_eq!(
            BinaryTable::from_sections(vec![s0.clone(), s2]),
            Err(TableError::MissingSection(1))
        );
        assert_eq!(
            BinaryTable::from_sections(vec![s0]),
            Err(TableError::MissingSection(1))
        );
    }

    #[test]
    fn test_assemble_inconsistent() {
        let s0 = Section::new_long(&header(), 0, 1, &[0]).unwrap();
        let mut other = header();
        other.version = 8;
        let s1 = Section::new_long(&other, 1, 1, &[1]).unwrap();
        assert!(matches!(
            BinaryTable::from_sections(vec![s0, s1]),
            Err(TableError::InconsistentSection { section: 1, .. })
        ));
    }

    #[test]
    fn test_assemble_mixed_indicators() {
        let s0 = Section::new_long(&header(), 0, 1, &[0]).unwrap();
        let mut next = header();
        next.is_current = false;
        let s1 = Section::new_long(&next, 1, 1, &[1]).unwrap();
        assert_eq!(
            BinaryTable::from_sections(vec![s0.clone(), s1]),
            Err(TableError::InconsistentSection {
                section: 1,
                reason: "current/next indicator differs"
            })
        );

        let mut public = header();
        public.private_indicator = false;
        let s1 = Section::new_long(&public, 1, 1, &[1]).unwrap();
        assert_eq!(
            BinaryTable::from_sections(vec![s0, s1]),
            Err(TableError::InconsistentSection {
                section: 1,
                reason: "private indicator differs"
            })
        );
    }
}
