//! Registry of the table formats, by table id.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::CodecConfig;
use crate::error::{TableError, TableResult};
use crate::section::BinaryTable;
use crate::table::{LongTable, Standard};
use crate::tables::{Dst, Rct, Unt};

/// Any supported table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table")]
pub enum AnyTable {
    #[serde(rename = "RCT")]
    Rct(Rct),
    #[serde(rename = "DST")]
    Dst(Dst),
    #[serde(rename = "UNT")]
    Unt(Unt),
}

impl AnyTable {
    pub fn table_id(&self) -> u8 {
        match self {
            AnyTable::Rct(_) => Rct::TABLE_ID,
            AnyTable::Dst(_) => Dst::TABLE_ID,
            AnyTable::Unt(_) => Unt::TABLE_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnyTable::Rct(_) => Rct::NAME,
            AnyTable::Dst(_) => Dst::NAME,
            AnyTable::Unt(_) => Unt::NAME,
        }
    }

    /// Serialize into sections.
    pub fn encode(&self, config: &CodecConfig) -> TableResult<BinaryTable> {
        match self {
            AnyTable::Rct(table) => table.encode(config),
            AnyTable::Dst(table) => table.encode(config),
            AnyTable::Unt(table) => table.encode(config),
        }
    }
}

impl From<Rct> for AnyTable {
    fn from(table: Rct) -> Self {
        AnyTable::Rct(table)
    }
}

impl From<Dst> for AnyTable {
    fn from(table: Dst) -> Self {
        AnyTable::Dst(table)
    }
}

impl From<Unt> for AnyTable {
    fn from(table: Unt) -> Self {
        AnyTable::Unt(table)
    }
}

/// Codec of one table format.
#[derive(Clone, Copy)]
pub struct TableCodec {
    pub table_id: u8,
    pub name: &'static str,
    pub standard: Standard,
    pub decode: fn(&BinaryTable) -> TableResult<AnyTable>,
}

impl fmt::Debug for TableCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCodec")
            .field("table_id", &self.table_id)
            .field("name", &self.name)
            .field("standard", &self.standard)
            .finish()
    }
}

fn decode_as<T>(table: &BinaryTable) -> TableResult<AnyTable>
where
    T: LongTable + Into<AnyTable>,
{
    T::decode(table).map(Into::into)
}

static GLOBAL: Lazy<TableRegistry> = Lazy::new(TableRegistry::standard);

/// Table codecs by table id.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    codecs: BTreeMap<u8, TableCodec>,
}

impl TableRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with all formats of this crate.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register::<Rct>();
        registry.register::<Dst>();
        registry.register::<Unt>();
        registry
    }

    /// The process-wide registry of all formats, built on first use.
    pub fn global() -> &'static TableRegistry {
        &GLOBAL
    }

    /// Register a format, replacing any previous one with the same table id.
    pub fn register<T>(&mut self)
    where
        T: LongTable + Into<AnyTable>,
    {
        let codec = TableCodec {
            table_id: T::TABLE_ID,
            name: T::NAME,
            standard: T::STANDARD,
            decode: decode_as::<T>,
        };
        if let Some(previous) = self.codecs.insert(T::TABLE_ID, codec) {
            log::warn!(
                "Table id 0x{:02X}: {} replaces {}",
                T::TABLE_ID,
                T::NAME,
                previous.name
            );
        }
    }

    pub fn get(&self, table_id: u8) -> Option<&TableCodec> {
        self.codecs.get(&table_id)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Registered codecs, by increasing table id.
    pub fn iter(&self) -> impl Iterator<Item = &TableCodec> {
        self.codecs.values()
    }

    /// Decode a table with the codec of its table id.
    pub fn decode(&self, table: &BinaryTable) -> TableResult<AnyTable> {
        let codec = self
            .get(table.table_id())
            .ok_or(TableError::UnknownTableId(table.table_id()))?;
        (codec.decode)(table)
    }

    /// Assemble raw sections and decode the table.
    pub fn decode_raw<I, B>(&self, raw: I, config: &CodecConfig) -> TableResult<AnyTable>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let table = BinaryTable::from_raw(raw, config.verify_crc)?;
        self.decode(&table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{Section, SectionHeader};
    use crate::tables::table_id;

    #[test]
    fn test_standard_registry() {
        let registry = TableRegistry::global();
        assert_eq!(registry.len(), 3);
        let ids: Vec<u8> = registry.iter().map(|codec| codec.table_id).collect();
        assert_eq!(ids, vec![table_id::UNT, table_id::RCT, table_id::DST]);
        let dst = registry.get(table_id::DST).unwrap();
        assert_eq!(dst.name, "DST");
        assert_eq!(dst.standard, Standard::Atsc);
        assert!(registry.get(0x00).is_none());
    }

    #[test]
    fn test_decode_by_table_id() {
        let unt = Unt {
            version: 2,
            is_current: true,
            action_type: 1,
            oui: 0x00015A,
            ..Default::default()
        };
        let binary = unt.encode(&CodecConfig::default()).unwrap();
        let decoded = TableRegistry::global().decode(&binary).unwrap();
        assert_eq!(decoded.name(), "UNT");
        assert_eq!(decoded.table_id(), 0x4B);
        assert_eq!(decoded, AnyTable::Unt(unt));
    }

    #[test]
    fn test_decode_raw_sections() {
        let rct = Rct {
            service_id: 5,
            is_current: true,
            ..Default::default()
        };
        let binary = AnyTable::from(rct.clone())
            .encode(&CodecConfig::default())
            .unwrap();
        let raw: Vec<Bytes> = binary.iter().map(|s| s.as_bytes().clone()).collect();
        let decoded = TableRegistry::global()
            .decode_raw(raw, &CodecConfig::default())
            .unwrap();
        assert_eq!(decoded, AnyTable::Rct(rct));
    }

    #[test]
    fn test_unknown_table_id() {
        let header = SectionHeader {
            table_id: 0x42,
            private_indicator: true,
            table_id_extension: 0,
            version: 0,
            is_current: true,
        };
        let section = Section::new_long(&header, 0, 0, &[]).unwrap();
        let binary = BinaryTable::from_sections(vec![section]).unwrap();
        assert_eq!(
            TableRegistry::new().decode(&binary),
            Err(TableError::UnknownTableId(0x42))
        );
        assert_eq!(
            TableRegistry::standard().decode(&binary),
            Err(TableError::UnknownTableId(0x42))
        );
    }
}
