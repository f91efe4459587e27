//! psi-tables - multi-section PSI/SI tables
//!
//! Tables are described as plain Rust structures and packed into as few long
//! sections as possible, splitting their entry lists and descriptor loops at
//! entry or descriptor boundaries. Decoding reassembles the sections and
//! rebuilds the structures.
//!
//! ```
//! use psi_tables::{CodecConfig, LongTable, Rct};
//!
//! let rct = Rct {
//!     service_id: 0x0101,
//!     year_offset: 2000,
//!     is_current: true,
//!     ..Default::default()
//! };
//! let binary = rct.encode(&CodecConfig::default()).unwrap();
//! assert_eq!(binary.section_count(), 1);
//! assert_eq!(Rct::decode(&binary).unwrap(), rct);
//! ```

pub mod config;
pub mod descriptors;
pub mod dsmcc;
pub mod error;
pub mod packer;
pub mod registry;
pub mod section;
pub mod table;
pub mod tables;

// Re-export commonly used types
pub use config::CodecConfig;
pub use error::{TableError, TableResult};
pub use packer::{BreakLayout, SectionPacker};
pub use registry::{AnyTable, TableCodec, TableRegistry};
pub use section::{BinaryTable, Section, SectionHeader};
pub use table::{Decoded, EntryList, LongTable, Standard};
pub use tables::{Dst, Rct, Unt};
