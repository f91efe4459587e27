//! Table formats.

pub mod dst;
pub mod rct;
pub mod unt;

pub use dst::{Application, Dst, DstTap};
pub use rct::{DvbBinaryLocator, Link, PromotionalText, Rct};
pub use unt::{Devices, Platform, Unt};

/// Table ids.
pub mod table_id {
    /// DVB Update Notification Table.
    pub const UNT: u8 = 0x4B;
    /// DVB Related Content Table.
    pub const RCT: u8 = 0x76;
    /// ATSC Data Service Table.
    pub const DST: u8 = 0xCF;
}
