//! Entry/table model shared by all table formats.

use std::ops::{Index, IndexMut};

use psi_buffer::PsiBuffer;
use serde::{Deserialize, Serialize};

use crate::config::CodecConfig;
use crate::error::{TableError, TableResult};
use crate::packer::SectionPacker;
use crate::section::{BinaryTable, Section, SectionHeader};

/// Standard defining a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Standard {
    Mpeg,
    Dvb,
    Atsc,
}

/// A table carried in long sections.
///
/// Implementations provide the fixed identification of the format and the
/// payload codec. Sections, packing and CRC32 are handled by the provided
/// methods.
pub trait LongTable: Default + Sized {
    const TABLE_ID: u8;
    const NAME: &'static str;
    const STANDARD: Standard;

    /// Version number (5 bits).
    fn version(&self) -> u8;

    fn is_current(&self) -> bool;

    /// Set the common properties read from the sections.
    fn set_version(&mut self, version: u8, is_current: bool);

    fn table_id_extension(&self) -> u16;

    /// Write the payload of all sections into the packer.
    fn serialize_payload(&self, packer: &mut SectionPacker) -> TableResult<()>;

    /// Read the payload of one section, appending to what was already read
    /// from the previous sections. Errors are reported through the buffer.
    fn deserialize_payload(&mut self, buf: &mut PsiBuffer, section: &Section);

    /// Header fields for the sections of this table.
    fn section_header(&self, config: &CodecConfig) -> SectionHeader {
        SectionHeader {
            table_id: Self::TABLE_ID,
            private_indicator: config.private_sections,
            table_id_extension: self.table_id_extension(),
            version: self.version(),
            is_current: self.is_current(),
        }
    }

    /// Serialize into as few sections as possible.
    fn encode(&self, config: &CodecConfig) -> TableResult<BinaryTable> {
        config.validate()?;
        let mut packer = SectionPacker::new(self.section_header(config), config.max_payload_size);
        self.serialize_payload(&mut packer)?;
        packer.finish()
    }

    /// Decode all sections, failing on the first error.
    fn decode(table: &BinaryTable) -> TableResult<Self> {
        Self::decode_partial(table).into_result()
    }

    /// Decode as many sections as possible.
    ///
    /// Decoding stops at the first invalid section. Everything decoded before
    /// the error is kept.
    fn decode_partial(table: &BinaryTable) -> Decoded<Self> {
        let mut decoded = Decoded {
            table: Self::default(),
            error: None,
        };
        decoded.table.set_version(table.version(), table.is_current());

        for section in table {
            if let Err(err) = decode_section(&mut decoded.table, section) {
                log::warn!(
                    "{}: stopped decoding at section #{}: {}",
                    Self::NAME,
                    section.section_number(),
                    err
                );
                decoded.error = Some(err);
                return decoded;
            }
        }

        log::debug!(
            "Decoded {} (extension 0x{:04X}, version {}) from {} section(s)",
            Self::NAME,
            table.table_id_extension(),
            table.version(),
            table.section_count()
        );
        decoded
    }
}

fn decode_section<T: LongTable>(table: &mut T, section: &Section) -> TableResult<()> {
    if section.table_id() != T::TABLE_ID {
        return Err(TableError::WrongTableId {
            expected: T::TABLE_ID,
            actual: section.table_id(),
        });
    }
    let mut buf = PsiBuffer::reader(section.payload());
    table.deserialize_payload(&mut buf, section);
    buf.check()?;
    if !buf.end_of_read() {
        return Err(TableError::InvalidSection(format!(
            "{} unread bytes in section #{}",
            buf.remaining_bytes(),
            section.section_number()
        )));
    }
    Ok(())
}

/// Result of a best-effort decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// Everything decoded before the first error.
    pub table: T,
    /// The first error, if any.
    pub error: Option<TableError>,
}

impl<T> Decoded<T> {
    /// True if every section was decoded.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> TableResult<T> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.table),
        }
    }
}

/// An ordered list of entries owned by a table or by a parent entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryList<T> {
    entries: Vec<T>,
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        EntryList {
            entries: Vec::new(),
        }
    }
}

impl<T> EntryList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    /// First entry matching `pred`.
    pub fn find<P>(&self, mut pred: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.entries.iter().find(|entry| pred(entry))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.entries.iter_mut()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }
}

impl<T: Default> EntryList<T> {
    /// Append a default entry and return it for filling.
    pub fn new_entry(&mut self) -> &mut T {
        let index = self.entries.len();
        self.entries.push(T::default());
        &mut self.entries[index]
    }
}

impl<T> Index<usize> for EntryList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.entries[index]
    }
}

impl<T> IndexMut<usize> for EntryList<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.entries[index]
    }
}

impl<T> FromIterator<T> for EntryList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        EntryList {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<T> From<Vec<T>> for EntryList<T> {
    fn from(entries: Vec<T>) -> Self {
        EntryList { entries }
    }
}

impl<'a, T> IntoIterator for &'a EntryList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
