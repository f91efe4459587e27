//! ATSC Data Service Table (A/90).

use bytes::Bytes;
use psi_buffer::{DescriptorList, PsiBuffer};
use serde::{Deserialize, Serialize};

use crate::dsmcc::{CompatibilityDescriptor, Tap};
use crate::error::TableResult;
use crate::packer::{BreakLayout, SectionPacker};
use crate::section::Section;
use crate::table::{EntryList, LongTable, Standard};

use super::table_id;

/// Data Service Table. A DST is always current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dst {
    pub version: u8,
    pub table_id_extension: u16,
    pub sdf_protocol_version: u8,
    pub apps: EntryList<Application>,
    pub descs: DescriptorList,
    #[serde(with = "psi_buffer::hextext")]
    pub service_private_data: Bytes,
}

impl Default for Dst {
    fn default() -> Self {
        Dst {
            version: 0,
            table_id_extension: 0xFFFF,
            sdf_protocol_version: 1,
            apps: EntryList::new(),
            descs: DescriptorList::new(),
            service_private_data: Bytes::new(),
        }
    }
}

/// Description of one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub compatibility_descriptor: CompatibilityDescriptor,
    /// Required when `app_id` is not empty.
    pub app_id_description: Option<u16>,
    #[serde(with = "psi_buffer::hextext")]
    pub app_id: Bytes,
    pub taps: EntryList<DstTap>,
    pub descs: DescriptorList,
    #[serde(with = "psi_buffer::hextext")]
    pub app_data: Bytes,
}

/// Tap of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DstTap {
    pub protocol_encapsulation: u8,
    /// 7 bits.
    pub action_type: u8,
    pub resource_location: bool,
    pub tap: Tap,
    pub descs: DescriptorList,
}

impl LongTable for Dst {
    const TABLE_ID: u8 = table_id::DST;
    const NAME: &'static str = "DST";
    const STANDARD: Standard = Standard::Atsc;

    fn version(&self) -> u8 {
        self.version
    }

    fn is_current(&self) -> bool {
        true
    }

    fn set_version(&mut self, version: u8, _is_current: bool) {
        self.version = version;
    }

    fn table_id_extension(&self) -> u16 {
        self.table_id_extension
    }

    fn serialize_payload(&self, packer: &mut SectionPacker) -> TableResult<()> {
        packer.buffer().put_u8(self.sdf_protocol_version);
        packer.set_fixed_part();

        // service_info_length, service_private_data_length
        let empty_tail = |buf: &mut PsiBuffer| {
            buf.put_u16(0);
            buf.put_u16(0);
        };
        let apps = BreakLayout::new().with_close(4, &empty_tail);
        packer.pack_entries(&apps, "application", Some(8), &self.apps, |app, buf| app.write(buf))?;

        let no_private_data = |buf: &mut PsiBuffer| buf.put_u16(0);
        let no_app = |buf: &mut PsiBuffer| buf.put_u8(0);
        let descs = BreakLayout::new()
            .with_close(2, &no_private_data)
            .with_reopen(&no_app);
        packer.pack_descriptors(&descs, &self.descs, 16)?;

        let no_app_no_descs = |buf: &mut PsiBuffer| {
            buf.put_u8(0);
            buf.put_u16(0);
        };
        let private_data = BreakLayout::new()
            .with_close(0, &no_private_data)
            .with_reopen(&no_app_no_descs);
        packer.pack_trailer(&private_data, "service private data", |buf| {
            buf.put_bytes_with_length(&self.service_private_data, 16)
        })
    }

    fn deserialize_payload(&mut self, buf: &mut PsiBuffer, section: &Section) {
        self.table_id_extension = section.table_id_extension();
        self.sdf_protocol_version = buf.get_u8();

        let app_count = buf.get_u8();
        for _ in 0..app_count {
            if buf.has_error() {
                break;
            }
            let app = Application::parse(buf);
            if !buf.has_error() {
                self.apps.push(app);
            }
        }

        buf.get_descriptor_list_with_length(&mut self.descs, 16);

        // Private data split over several sections is concatenated.
        let data = buf.get_bytes_with_length(16);
        if !data.is_empty() {
            if self.service_private_data.is_empty() {
                self.service_private_data = data;
            } else {
                let mut joined = self.service_private_data.to_vec();
                joined.extend_from_slice(&data);
                self.service_private_data = joined.into();
            }
        }
    }
}

impl Application {
    pub fn write(&self, buf: &mut PsiBuffer) {
        if self.app_id_description.is_none() && !self.app_id.is_empty() {
            buf.set_shape_error("application id without app_id_description");
            return;
        }
        if self.taps.len() > u8::MAX as usize {
            buf.set_shape_error(format!("{} taps in application, max: 255", self.taps.len()));
            return;
        }

        self.compatibility_descriptor.write(buf);
        buf.push_write_length(16);
        if let Some(description) = self.app_id_description {
            buf.put_u16(description);
            buf.put_bytes(&self.app_id);
        }
        buf.pop_state();

        buf.put_u8(self.taps.len() as u8);
        for tap in &self.taps {
            buf.put_u8(tap.protocol_encapsulation);
            buf.put_bits(u64::from(tap.action_type), 7);
            buf.put_bool(tap.resource_location);
            tap.tap.write(buf);
            buf.put_descriptor_list_with_length(&tap.descs, 0, 16);
        }
        buf.put_descriptor_list_with_length(&self.descs, 0, 16);
        buf.put_bytes_with_length(&self.app_data, 16);
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        let mut app = Application {
            compatibility_descriptor: CompatibilityDescriptor::parse(buf),
            ..Default::default()
        };

        buf.push_read_size_from_length(16);
        match buf.remaining_bytes() {
            0 => {}
            1 => buf.set_shape_error("application id block of 1 byte"),
            _ => {
                app.app_id_description = Some(buf.get_u16());
                app.app_id = buf.get_remaining_bytes();
            }
        }
        buf.pop_state();

        let tap_count = buf.get_u8();
        for _ in 0..tap_count {
            if buf.has_error() {
                break;
            }
            let tap = app.taps.new_entry();
            tap.protocol_encapsulation = buf.get_u8();
            tap.action_type = buf.get_bits(7) as u8;
            tap.resource_location = buf.get_bool();
            tap.tap = Tap::parse(buf);
            buf.get_descriptor_list_with_length(&mut tap.descs, 16);
        }

        buf.get_descriptor_list_with_length(&mut app.descs, 16);
        app.app_data = buf.get_bytes_with_length(16);
        app
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::dsmcc::CompatibilityEntry;
    use crate::error::TableError;
    use crate::section::{BinaryTable, SectionHeader};
    use psi_buffer::BufferError;

    fn app(index: u8, data_size: usize) -> Application {
        let mut tap_descs = DescriptorList::new();
        tap_descs.add(0x81, vec![index]).unwrap();
        Application {
            compatibility_descriptor: CompatibilityDescriptor {
                entries: vec![CompatibilityEntry {
                    descriptor_type: 1,
                    specifier_data: 0x00_10_00,
                    model: u16::from(index),
                    ..Default::default()
                }],
            },
            app_id_description: Some(0x0001),
            app_id: Bytes::from(vec![index; 4]),
            taps: vec![DstTap {
                protocol_encapsulation: 0x0F,
                action_type: 0x7F,
                resource_location: true,
                tap: Tap {
                    id: u16::from(index),
                    tap_use: 0x0B,
                    association_tag: 0x20,
                    selector: Bytes::new(),
                },
                descs: tap_descs,
            }]
            .into(),
            descs: DescriptorList::new(),
            app_data: Bytes::from(vec![0xA5; data_size]),
        }
    }

    fn section_of(payload: &[u8]) -> BinaryTable {
        let header = SectionHeader {
            table_id: 0xCF,
            private_indicator: true,
            table_id_extension: 0xFFFF,
            version: 0,
            is_current: true,
        };
        let section = Section::new_long(&header, 0, 0, payload).unwrap();
        BinaryTable::from_sections(vec![section]).unwrap()
    }

    #[test]
    fn test_empty_dst() {
        let dst = Dst::default();
        let binary = dst.encode(&CodecConfig::default()).unwrap();
        assert_eq!(binary.section_count(), 1);
        assert_eq!(binary.table_id_extension(), 0xFFFF);
        assert!(binary.is_current());
        assert_eq!(binary.sections()[0].payload(), &[0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(Dst::decode(&binary).unwrap(), dst);
    }

    #[test]
    fn test_application_layout() {
        let app = Application {
            app_id_description: Some(0x0102),
            app_id: Bytes::from_static(&[0xAA]),
            app_data: Bytes::from_static(&[0xDD, 0xEE]),
            ..Default::default()
        };
        let mut buf = PsiBuffer::writer(64);
        app.write(&mut buf);
        assert!(buf.check().is_ok());
        assert_eq!(
            buf.written(),
            &[
                0x00, 0x02, 0x00, 0x00, // empty compatibility descriptor
                0x00, 0x03, 0x01, 0x02, 0xAA, // application id
                0x00, // no tap
                0x00, 0x00, // no descriptor
                0x00, 0x02, 0xDD, 0xEE, // application data
            ][..]
        );
        let bytes = buf.into_bytes();
        let mut buf = PsiBuffer::reader(&bytes);
        assert_eq!(Application::parse(&mut buf), app);
        assert!(buf.end_of_read());
    }

    #[test]
    fn test_apps_across_sections() {
        let mut dst = Dst {
            version: 4,
            table_id_extension: 0x0042,
            sdf_protocol_version: 1,
            ..Default::default()
        };
        for i in 0..12 {
            dst.apps.push(app(i, 60));
        }
        for i in 0..10u8 {
            dst.descs.add(0x90 + i, vec![i; 30]).unwrap();
        }
        dst.service_private_data = Bytes::from(vec![0x5A; 100]);

        let config = CodecConfig::default().with_max_payload_size(300);
        let binary = dst.encode(&config).unwrap();
        assert!(binary.section_count() >= 4);
        for section in &binary {
            assert!(section.payload().len() <= 300);
            assert_eq!(section.payload()[0], 1);
        }
        assert_eq!(Dst::decode(&binary).unwrap(), dst);
    }

    #[test]
    fn test_private_data_moves_to_new_section() {
        let mut dst = Dst::default();
        dst.apps.push(app(0, 0));
        dst.service_private_data = Bytes::from(vec![0x11; 30]);
        let app_size = {
            let mut buf = PsiBuffer::writer(1024);
            dst.apps[0].write(&mut buf);
            buf.position()
        };
        // Room for the application and the empty loops, not for the private data.
        let config = CodecConfig::default().with_max_payload_size(2 + app_size + 4 + 10);
        let binary = dst.encode(&config).unwrap();
        assert_eq!(binary.section_count(), 2);

        let second = binary.sections()[1].payload();
        assert_eq!(&second[..6], &[0x01, 0x00, 0x00, 0x00, 0x00, 0x1E]);
        assert_eq!(Dst::decode(&binary).unwrap(), dst);
    }

    #[test]
    fn test_app_id_without_description() {
        let app = Application {
            app_id: Bytes::from_static(&[1, 2]),
            ..Default::default()
        };
        let dst = Dst {
            apps: vec![app].into(),
            ..Default::default()
        };
        assert!(matches!(
            dst.encode(&CodecConfig::default()),
            Err(TableError::Buffer(BufferError::Shape(_)))
        ));
    }

    #[test]
    fn test_app_id_block_of_one_byte() {
        let payload = [
            0x01, 0x01, // sdf_protocol_version, 1 application
            0x00, 0x02, 0x00, 0x00, // empty compatibility descriptor
            0x00, 0x01, 0x55, // 1-byte application id block
            0x00, 0x00, 0x00, 0x00, 0x00, // no tap, no descriptor, no data
            0x00, 0x00, 0x00, 0x00,
        ];
        let decoded = Dst::decode_partial(&section_of(&payload));
        assert!(matches!(
            decoded.error,
            Some(TableError::Buffer(BufferError::Shape(_)))
        ));
        assert!(decoded.table.apps.is_empty());
    }

    #[test]
    fn test_oversized_private_data() {
        let dst = Dst {
            service_private_data: Bytes::from(vec![0; 4084]),
            ..Default::default()
        };
        assert!(matches!(
            dst.encode(&CodecConfig::default()),
            Err(TableError::Capacity {
                what: "service private data",
                ..
            })
        ));
    }
}
