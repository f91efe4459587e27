//! DVB System Software Update Notification Table (ETSI TS 102 006).

use psi_buffer::{DescriptorList, PsiBuffer};
use serde::{Deserialize, Serialize};

use crate::dsmcc::CompatibilityDescriptor;
use crate::error::TableResult;
use crate::packer::{BreakLayout, SectionPacker};
use crate::section::Section;
use crate::table::{EntryList, LongTable, Standard};

use super::table_id;

/// Update Notification Table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Unt {
    pub version: u8,
    pub is_current: bool,
    pub action_type: u8,
    /// 24 bits.
    pub oui: u32,
    pub processing_order: u8,
    pub descs: DescriptorList,
    pub devices: EntryList<Devices>,
}

/// A set of devices and their platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Devices {
    pub compatibility_descriptor: CompatibilityDescriptor,
    pub platforms: EntryList<Platform>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    pub target_descs: DescriptorList,
    pub operational_descs: DescriptorList,
}

/// XOR of the three bytes of an OUI.
pub fn oui_hash(oui: u32) -> u8 {
    ((oui >> 16) ^ (oui >> 8) ^ oui) as u8
}

impl LongTable for Unt {
    const TABLE_ID: u8 = table_id::UNT;
    const NAME: &'static str = "UNT";
    const STANDARD: Standard = Standard::Dvb;

    fn version(&self) -> u8 {
        self.version
    }

    fn is_current(&self) -> bool {
        self.is_current
    }

    fn set_version(&mut self, version: u8, is_current: bool) {
        self.version = version;
        self.is_current = is_current;
    }

    fn table_id_extension(&self) -> u16 {
        (u16::from(self.action_type) << 8) | u16::from(oui_hash(self.oui))
    }

    fn serialize_payload(&self, packer: &mut SectionPacker) -> TableResult<()> {
        packer.buffer().put_u24(self.oui);
        packer.buffer().put_u8(self.processing_order);
        packer.set_fixed_part();

        packer.pack_descriptors(&BreakLayout::new(), &self.descs, 12)?;

        // Sections opened for devices have an empty common descriptor loop.
        let empty_descs = |buf: &mut PsiBuffer| buf.put_u16(0xF000);
        let devices = BreakLayout::new().with_reopen(&empty_descs);
        packer.pack_entries(&devices, "device set", None, &self.devices, |devs, buf| {
            devs.write(buf)
        })
    }

    fn deserialize_payload(&mut self, buf: &mut PsiBuffer, section: &Section) {
        self.action_type = (section.table_id_extension() >> 8) as u8;
        self.oui = buf.get_u24();
        self.processing_order = buf.get_u8();
        if !buf.has_error() && (section.table_id_extension() & 0xFF) as u8 != oui_hash(self.oui) {
            log::debug!(
                "UNT section #{}: OUI hash 0x{:02X} does not match OUI 0x{:06X}",
                section.section_number(),
                section.table_id_extension() & 0xFF,
                self.oui
            );
        }

        buf.get_descriptor_list_with_length(&mut self.descs, 12);

        while !buf.has_error() && !buf.end_of_read() {
            let devs = Devices::parse(buf);
            if !buf.has_error() {
                self.devices.push(devs);
            }
        }
    }
}

impl Devices {
    pub fn write(&self, buf: &mut PsiBuffer) {
        self.compatibility_descriptor.write(buf);
        buf.push_write_length(16);
        for platform in &self.platforms {
            buf.put_descriptor_list_with_length(&platform.target_descs, 0, 12);
            buf.put_descriptor_list_with_length(&platform.operational_descs, 0, 12);
        }
        buf.pop_state();
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        let mut devs = Devices {
            compatibility_descriptor: CompatibilityDescriptor::parse(buf),
            ..Default::default()
        };
        buf.push_read_size_from_length(16);
        while !buf.has_error() && !buf.end_of_read() {
            let platform = devs.platforms.new_entry();
            buf.get_descriptor_list_with_length(&mut platform.target_descs, 12);
            buf.get_descriptor_list_with_length(&mut platform.operational_descs, 12);
        }
        buf.pop_state();
        devs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::dsmcc::CompatibilityEntry;
    use crate::error::TableError;
    use psi_buffer::BufferError;

    fn devices(model: u16, descs: usize) -> Devices {
        let mut target = DescriptorList::new();
        let mut operational = DescriptorList::new();
        for i in 0..descs {
            target.add(0x02, vec![i as u8; 10]).unwrap();
            operational.add(0x04, vec![i as u8; 3]).unwrap();
        }
        Devices {
            compatibility_descriptor: CompatibilityDescriptor {
                entries: vec![CompatibilityEntry {
                    descriptor_type: 0x02,
                    specifier_data: 0x00015A,
                    model,
                    ..Default::default()
                }],
            },
            platforms: vec![Platform {
                target_descs: target,
                operational_descs: operational,
            }]
            .into(),
        }
    }

    #[test]
    fn test_table_id_extension() {
        let unt = Unt {
            action_type: 0x01,
            oui: 0x00015A,
            ..Default::default()
        };
        assert_eq!(oui_hash(0x00015A), 0x5B);
        assert_eq!(unt.table_id_extension(), 0x015B);
    }

    #[test]
    fn test_oui_wider_than_24_bits() {
        let unt = Unt {
            oui: 0x0100_015A,
            ..Default::default()
        };
        assert!(matches!(
            unt.encode(&CodecConfig::default()),
            Err(TableError::Buffer(BufferError::Shape(_)))
        ));
    }

    #[test]
    fn test_devices_layout() {
        let devs = Devices {
            compatibility_descriptor: CompatibilityDescriptor::default(),
            platforms: vec![Platform::default()].into(),
        };
        let mut buf = PsiBuffer::writer(32);
        devs.write(&mut buf);
        assert!(buf.check().is_ok());
        assert_eq!(
            buf.written(),
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0xF0, 0x00, 0xF0, 0x00]
        );
        let bytes = buf.into_bytes();
        let mut buf = PsiBuffer::reader(&bytes);
        assert_eq!(Devices::parse(&mut buf), devs);
        assert!(buf.end_of_read());
    }

    #[test]
    fn test_unt_round_trip() {
        let mut unt = Unt {
            version: 9,
            is_current: true,
            action_type: 1,
            oui: 0x00015A,
            processing_order: 0xFF,
            ..Default::default()
        };
        unt.descs.add(0x0C, vec![0x01, 0x02]).unwrap();
        for model in 0..3 {
            unt.devices.push(devices(model, 2));
        }

        let binary = unt.encode(&CodecConfig::default()).unwrap();
        assert_eq!(binary.section_count(), 1);
        assert_eq!(binary.table_id(), 0x4B);
        assert_eq!(binary.table_id_extension(), 0x015B);
        assert_eq!(Unt::decode(&binary).unwrap(), unt);
    }

    #[test]
    fn test_devices_across_sections() {
        let mut unt = Unt {
            version: 1,
            is_current: true,
            oui: 0x123456,
            ..Default::default()
        };
        for i in 0..10u8 {
            unt.descs.add(0x40 + i, vec![i; 20]).unwrap();
        }
        for model in 0..8 {
            unt.devices.push(devices(model, 3));
        }

        let config = CodecConfig::default().with_max_payload_size(150);
        let binary = unt.encode(&config).unwrap();
        assert!(binary.section_count() > 3);
        for section in &binary {
            let payload = section.payload();
            assert!(payload.len() <= 150);
            assert_eq!(&payload[..4], &[0x12, 0x34, 0x56, 0x00]);
        }
        // The last section only holds device sets.
        let last = binary.sections()[binary.section_count() - 1].payload();
        assert_eq!(&last[4..6], &[0xF0, 0x00]);

        assert_eq!(Unt::decode(&binary).unwrap(), unt);
    }

    #[test]
    fn test_device_set_too_large() {
        let mut unt = Unt::default();
        unt.devices.push(devices(0, 20));
        let config = CodecConfig::default().with_max_payload_size(200);
        assert!(matches!(
            unt.encode(&config),
            Err(TableError::Capacity {
                what: "device set",
                index: 0,
                ..
            })
        ));
    }
}
