//! Typed views of well-known descriptors.
//!
//! Descriptor lists keep every descriptor as an opaque payload. The types in
//! this module convert from and to that representation when the content of a
//! descriptor is needed.

use psi_buffer::{BufferError, Descriptor, DescriptorList, PsiBuffer, MAX_DESCRIPTOR_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};

/// Descriptor tags.
pub mod descriptor_tag {
    pub const NETWORK_NAME: u8 = 0x40;
    pub const SATELLITE_DELIVERY: u8 = 0x43;
    pub const SERVICE: u8 = 0x48;
}

/// A descriptor with a known payload structure.
pub trait KnownDescriptor: Sized {
    const TAG: u8;

    /// Read the payload. Errors are reported through the buffer.
    fn parse_payload(buf: &mut PsiBuffer) -> Self;

    /// Write the payload. Errors are reported through the buffer.
    fn write_payload(&self, buf: &mut PsiBuffer);

    /// Decode an opaque descriptor.
    fn from_descriptor(desc: &Descriptor) -> Result<Self, BufferError> {
        if desc.tag() != Self::TAG {
            return Err(BufferError::Shape(format!(
                "descriptor tag 0x{:02X}, expected 0x{:02X}",
                desc.tag(),
                Self::TAG
            )));
        }
        let mut buf = PsiBuffer::reader(desc.payload());
        let value = Self::parse_payload(&mut buf);
        buf.check()?;
        if !buf.end_of_read() {
            return Err(BufferError::Shape(format!(
                "{} extra bytes in descriptor 0x{:02X}",
                buf.remaining_bytes(),
                Self::TAG
            )));
        }
        Ok(value)
    }

    /// Encode as an opaque descriptor.
    fn to_descriptor(&self) -> Result<Descriptor, BufferError> {
        let mut buf = PsiBuffer::writer(MAX_DESCRIPTOR_PAYLOAD_SIZE);
        self.write_payload(&mut buf);
        buf.check()?;
        Descriptor::new(Self::TAG, buf.into_bytes())
    }
}

/// Decode the first descriptor of type `D` in a list.
pub fn find_descriptor<D: KnownDescriptor>(list: &DescriptorList) -> Option<Result<D, BufferError>> {
    list.search(D::TAG, 0).map(|index| D::from_descriptor(&list[index]))
}

/// Service descriptor (0x48).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDescriptor {
    /// Service type.
    pub service_type: u8,
    /// Service provider name.
    pub provider_name: String,
    /// Service name.
    pub service_name: String,
}

impl KnownDescriptor for ServiceDescriptor {
    const TAG: u8 = descriptor_tag::SERVICE;

    fn parse_payload(buf: &mut PsiBuffer) -> Self {
        ServiceDescriptor {
            service_type: buf.get_u8(),
            provider_name: buf.get_string_with_length(8),
            service_name: buf.get_string_with_length(8),
        }
    }

    fn write_payload(&self, buf: &mut PsiBuffer) {
        buf.put_u8(self.service_type);
        buf.put_string_with_length(&self.provider_name, 8);
        buf.put_string_with_length(&self.service_name, 8);
    }
}

/// Network name descriptor (0x40).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkNameDescriptor {
    /// Network name.
    pub network_name: String,
}

impl KnownDescriptor for NetworkNameDescriptor {
    const TAG: u8 = descriptor_tag::NETWORK_NAME;

    fn parse_payload(buf: &mut PsiBuffer) -> Self {
        let bytes = buf.get_remaining_bytes();
        match String::from_utf8(bytes.to_vec()) {
            Ok(network_name) => NetworkNameDescriptor { network_name },
            Err(err) => {
                buf.set_shape_error(format!("invalid UTF-8 network name: {}", err));
                NetworkNameDescriptor::default()
            }
        }
    }

    fn write_payload(&self, buf: &mut PsiBuffer) {
        buf.put_bytes(self.network_name.as_bytes());
    }
}

/// Satellite delivery system descriptor (0x43).
///
/// Numeric fields are BCD-coded on the wire and kept in their wire units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SatelliteDeliveryDescriptor {
    /// Frequency in units of 10 kHz (8 digits).
    pub frequency: u32,
    /// Orbital position in units of 0.1 degree (4 digits).
    pub orbital_position: u16,
    /// West/East flag (false = East).
    pub west_east_flag: bool,
    /// Polarization (2 bits).
    pub polarization: u8,
    /// Roll-off factor, DVB-S2 only (2 bits).
    pub roll_off: u8,
    /// Modulation system (0 = DVB-S, 1 = DVB-S2).
    pub modulation_system: u8,
    /// Modulation type (2 bits).
    pub modulation_type: u8,
    /// Symbol rate in units of 100 symbols/s (7 digits).
    pub symbol_rate: u32,
    /// FEC inner (4 bits).
    pub fec_inner: u8,
}

impl SatelliteDeliveryDescriptor {
    /// Frequency in kHz.
    pub fn frequency_khz(&self) -> u64 {
        u64::from(self.frequency) * 10
    }

    /// Symbol rate in symbols/s.
    pub fn symbol_rate_sps(&self) -> u64 {
        u64::from(self.symbol_rate) * 100
    }
}

impl KnownDescriptor for SatelliteDeliveryDescriptor {
    const TAG: u8 = descriptor_tag::SATELLITE_DELIVERY;

    fn parse_payload(buf: &mut PsiBuffer) -> Self {
        SatelliteDeliveryDescriptor {
            frequency: buf.get_bcd(8) as u32,
            orbital_position: buf.get_bcd(4) as u16,
            west_east_flag: buf.get_bool(),
            polarization: buf.get_bits(2) as u8,
            roll_off: buf.get_bits(2) as u8,
            modulation_system: buf.get_bits(1) as u8,
            modulation_type: buf.get_bits(2) as u8,
            symbol_rate: buf.get_bcd(7) as u32,
            fec_inner: buf.get_bits(4) as u8,
        }
    }

    fn write_payload(&self, buf: &mut PsiBuffer) {
        buf.put_bcd(u64::from(self.frequency), 8);
        buf.put_bcd(u64::from(self.orbital_position), 4);
        buf.put_bool(self.west_east_flag);
        buf.put_bits(u64::from(self.polarization), 2);
        buf.put_bits(u64::from(self.roll_off), 2);
        buf.put_bits(u64::from(self.modulation_system), 1);
        buf.put_bits(u64::from(self.modulation_type), 2);
        buf.put_bcd(u64::from(self.symbol_rate), 7);
        buf.put_bits(u64::from(self.fec_inner), 4);
    }
}
