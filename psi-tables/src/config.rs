//! Codec configuration.
//!
//! The configuration can be read from a TOML file:
//!
//! ```toml
//! max_payload_size = 1012
//! verify_crc = true
//! private_sections = true
//! ```
//!
//! Missing fields take their default values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TableError, TableResult};
use crate::section::MAX_PRIVATE_LONG_PAYLOAD_SIZE;

/// Smallest accepted section payload size.
pub const MIN_PAYLOAD_SIZE: usize = 16;

/// Parameters passed to table serialization and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Maximum payload size of a generated section, header and CRC32 excluded.
    pub max_payload_size: usize,
    /// Check the CRC32 of sections parsed from raw bytes.
    pub verify_crc: bool,
    /// Set the private indicator in generated section headers.
    pub private_sections: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            max_payload_size: MAX_PRIVATE_LONG_PAYLOAD_SIZE,
            verify_crc: true,
            private_sections: true,
        }
    }
}

impl CodecConfig {
    /// Check that all values are in range.
    pub fn validate(&self) -> TableResult<()> {
        if !(MIN_PAYLOAD_SIZE..=MAX_PRIVATE_LONG_PAYLOAD_SIZE).contains(&self.max_payload_size) {
            return Err(TableError::Config(format!(
                "max_payload_size {} out of range {}..={}",
                self.max_payload_size, MIN_PAYLOAD_SIZE, MAX_PRIVATE_LONG_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(contents: &str) -> TableResult<Self> {
        let config: CodecConfig =
            toml::from_str(contents).map_err(|e| TableError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> TableResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TableError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        log::debug!("Loaded codec config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Same configuration with another maximum payload size.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }
}
