//! DVB Related Content Table (ETSI TS 102 323).

use bytes::Bytes;
use psi_buffer::{DescriptorList, PsiBuffer};
use serde::{Deserialize, Serialize};

use crate::error::TableResult;
use crate::packer::{BreakLayout, SectionPacker};
use crate::section::Section;
use crate::table::{EntryList, LongTable, Standard};

use super::table_id;

/// Related Content Table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rct {
    pub version: u8,
    pub is_current: bool,
    /// Table id extension.
    pub service_id: u16,
    pub year_offset: u16,
    pub links: EntryList<Link>,
    pub descs: DescriptorList,
}

/// One link to related content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    /// 0: URI, 1: binary locator, 2: both, 3: descriptor.
    pub link_type: u8,
    pub how_related_classification_scheme_id: u8,
    pub term_id: u16,
    pub group_id: u8,
    pub precedence: u8,
    /// Present iff `link_type` is 0 or 2. Kept as broadcast, in hex text
    /// form for serde.
    #[serde(with = "psi_buffer::hextext::option")]
    pub media_uri: Option<Bytes>,
    /// Present iff `link_type` is 1 or 2.
    pub dvb_binary_locator: Option<DvbBinaryLocator>,
    pub promotional_texts: Vec<PromotionalText>,
    pub default_icon_flag: bool,
    pub icon_id: u8,
    pub descs: DescriptorList,
}

/// DVB binary locator of a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DvbBinaryLocator {
    pub identifier_type: u8,
    pub scheduled_time_reliability: bool,
    pub inline_service: bool,
    /// 9 bits.
    pub start_date: u16,
    /// 10 bits, when the service is not inline.
    pub dvb_service_triplet_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub service_id: u16,
    pub start_time: u16,
    pub duration: u16,
    pub event_id: u16,
    #[serde(rename = "TVA_id")]
    pub tva_id: u16,
    pub component_tag: u8,
    pub early_start_window: u8,
    pub late_end_window: u8,
}

/// Text promoting a link, in one language.
///
/// The text is DVB text (EN 300 468 annex A), not necessarily UTF-8, and is
/// kept byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionalText {
    pub language_code: String,
    #[serde(with = "psi_buffer::hextext")]
    pub text: Bytes,
}

fn has_media_uri(link_type: u8) -> bool {
    link_type == 0 || link_type == 2
}

fn has_binary_locator(link_type: u8) -> bool {
    link_type == 1 || link_type == 2
}

impl LongTable for Rct {
    const TABLE_ID: u8 = table_id::RCT;
    const NAME: &'static str = "RCT";
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
        self.service_id
    }

    fn serialize_payload(&self, packer: &mut SectionPacker) -> TableResult<()> {
        packer.buffer().put_u16(self.year_offset);
        packer.set_fixed_part();

        // A section closed in the link loop ends with an empty descriptor loop.
        let empty_descs = |buf: &mut PsiBuffer| buf.put_u16(0xF000);
        let links = BreakLayout::new().with_close(2, &empty_descs);
        packer.pack_entries(&links, "link", Some(8), &self.links, |link, buf| {
            buf.put_reserved(4);
            buf.push_write_length(12);
            link.write(buf);
            buf.pop_state();
        })?;

        // A section opened in the descriptor loop has no link.
        let no_link = |buf: &mut PsiBuffer| buf.put_u8(0);
        let descs = BreakLayout::new().with_reopen(&no_link);
        packer.pack_descriptors(&descs, &self.descs, 12)
    }

    fn deserialize_payload(&mut self, buf: &mut PsiBuffer, section: &Section) {
        self.service_id = section.table_id_extension();
        self.year_offset = buf.get_u16();

        let link_count = buf.get_u8();
        for _ in 0..link_count {
            if buf.has_error() {
                break;
            }
            buf.skip_reserved_bits(4);
            buf.push_read_size_from_length(12);
            let link = Link::parse(buf);
            if !buf.end_of_read() {
                buf.set_shape_error("extra bytes at end of link");
            }
            buf.pop_state();
            if !buf.has_error() {
                log::trace!("RCT link type {}, term id {}", link.link_type, link.term_id);
                self.links.push(link);
            }
        }

        buf.get_descriptor_list_with_length(&mut self.descs, 12);
    }
}

impl Link {
    pub fn write(&self, buf: &mut PsiBuffer) {
        if self.media_uri.is_some() != has_media_uri(self.link_type) {
            buf.set_shape_error(format!("media URI does not match link type {}", self.link_type));
            return;
        }
        if self.dvb_binary_locator.is_some() != has_binary_locator(self.link_type) {
            buf.set_shape_error(format!(
                "DVB binary locator does not match link type {}",
                self.link_type
            ));
            return;
        }
        if self.promotional_texts.len() > 63 {
            buf.set_shape_error(format!(
                "{} promotional texts, max: 63",
                self.promotional_texts.len()
            ));
            return;
        }

        buf.put_bits(u64::from(self.link_type), 4);
        buf.put_reserved(2);
        buf.put_bits(u64::from(self.how_related_classification_scheme_id), 6);
        buf.put_bits(u64::from(self.term_id), 12);
        buf.put_bits(u64::from(self.group_id), 4);
        buf.put_bits(u64::from(self.precedence), 4);
        if let Some(uri) = &self.media_uri {
            buf.put_bytes_with_length(uri, 8);
        }
        if let Some(locator) = &self.dvb_binary_locator {
            locator.write(buf);
        }
        buf.put_reserved(2);
        buf.put_bits(self.promotional_texts.len() as u64, 6);
        for text in &self.promotional_texts {
            buf.put_language_code(&text.language_code);
            buf.put_bytes_with_length(&text.text, 8);
        }
        buf.put_bool(self.default_icon_flag);
        buf.put_bits(u64::from(self.icon_id), 3);
        buf.put_descriptor_list_with_length(&self.descs, 0, 12);
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        let mut link = Link {
            link_type: buf.get_bits(4) as u8,
            ..Default::default()
        };
        buf.skip_reserved_bits(2);
        link.how_related_classification_scheme_id = buf.get_bits(6) as u8;
        link.term_id = buf.get_bits(12) as u16;
        link.group_id = buf.get_bits(4) as u8;
        link.precedence = buf.get_bits(4) as u8;
        if has_media_uri(link.link_type) {
            link.media_uri = Some(buf.get_bytes_with_length(8));
        }
        if has_binary_locator(link.link_type) {
            link.dvb_binary_locator = Some(DvbBinaryLocator::parse(buf));
        }
        buf.skip_reserved_bits(2);
        let text_count = buf.get_bits(6);
        for _ in 0..text_count {
            if buf.has_error() {
                break;
            }
            link.promotional_texts.push(PromotionalText {
                language_code: buf.get_language_code(),
                text: buf.get_bytes_with_length(8),
            });
        }
        link.default_icon_flag = buf.get_bool();
        link.icon_id = buf.get_bits(3) as u8;
        buf.get_descriptor_list_with_length(&mut link.descs, 12);
        link
    }
}

impl DvbBinaryLocator {
    pub fn write(&self, buf: &mut PsiBuffer) {
        buf.put_bits(u64::from(self.identifier_type), 2);
        buf.put_bool(self.scheduled_time_reliability);
        buf.put_bool(self.inline_service);
        buf.put_reserved(1);
        buf.put_bits(u64::from(self.start_date), 9);
        if self.inline_service {
            buf.put_reserved(2);
            buf.put_u16(self.transport_stream_id);
            buf.put_u16(self.original_network_id);
            buf.put_u16(self.service_id);
        } else {
            buf.put_bits(u64::from(self.dvb_service_triplet_id), 10);
        }
        buf.put_u16(self.start_time);
        buf.put_u16(self.duration);
        match self.identifier_type {
            1 => buf.put_u16(self.event_id),
            2 => buf.put_u16(self.tva_id),
            3 => {
                buf.put_u16(self.tva_id);
                buf.put_u8(self.component_tag);
            }
            _ => {
                if self.scheduled_time_reliability {
                    buf.put_bits(u64::from(self.early_start_window), 3);
                    buf.put_bits(u64::from(self.late_end_window), 5);
                }
            }
        }
    }

    pub fn parse(buf: &mut PsiBuffer) -> Self {
        let mut locator = DvbBinaryLocator {
            identifier_type: buf.get_bits(2) as u8,
            scheduled_time_reliability: buf.get_bool(),
            inline_service: buf.get_bool(),
            ..Default::default()
        };
        buf.skip_reserved_bits(1);
        locator.start_date = buf.get_bits(9) as u16;
        if locator.inline_service {
            buf.skip_reserved_bits(2);
            locator.transport_stream_id = buf.get_u16();
            locator.original_network_id = buf.get_u16();
            locator.service_id = buf.get_u16();
        } else {
            locator.dvb_service_triplet_id = buf.get_bits(10) as u16;
        }
        locator.start_time = buf.get_u16();
        locator.duration = buf.get_u16();
        match locator.identifier_type {
            1 => locator.event_id = buf.get_u16(),
            2 => locator.tva_id = buf.get_u16(),
            3 => {
                locator.tva_id = buf.get_u16();
                locator.component_tag = buf.get_u8();
            }
            _ => {
                if locator.scheduled_time_reliability {
                    locator.early_start_window = buf.get_bits(3) as u8;
                    locator.late_end_window = buf.get_bits(5) as u8;
                }
            }
        }
        locator
    }
}
