//! # Memory Configuration
//!
//! Sizes negotiated at startup: the backing store and the zone carved out
//! of it. Values come from defaults, an optional TOML file, and finally
//! command-line style arguments.
//!
//! ```toml
//! store_size = 16777216
//! zone_kilobytes = 64
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{MemoryError, MemoryResult};
use crate::hunk::RECORD_HEADER;
use crate::store::MAX_STORE_SIZE;
use crate::zone::{BLOCK_HEADER, DEFAULT_ZONE_SIZE, MIN_FRAGMENT};

/// Default backing store size (8 MiB).
pub const DEFAULT_STORE_SIZE: usize = 8 * 1024 * 1024;

/// Startup sizes for a [`MemorySystem`](crate::MemorySystem).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Bytes in the backing store.
    pub store_size: usize,
    /// Zone capacity in kilobytes.
    pub zone_kilobytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store_size: DEFAULT_STORE_SIZE,
            zone_kilobytes: DEFAULT_ZONE_SIZE / 1024,
        }
    }
}

impl MemoryConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse or names unknown keys.
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        toml::from_str(text).map_err(|err| MemoryError::InvalidConfig(err.to_string()))
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read; `InvalidConfig` if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Applies startup arguments. Recognizes `-zone <kilobytes>`; other
    /// arguments are left for the host.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `-zone` is last or its value is not a number.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oroboros_memory::MemoryConfig;
    ///
    /// let mut config = MemoryConfig::default();
    /// config.apply_args(["-zone", "128", "+map", "start"]).unwrap();
    /// assert_eq!(config.zone_size(), 128 * 1024);
    /// ```
    pub fn apply_args<I, S>(&mut self, args: I) -> MemoryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg.as_ref() != "-zone" {
                continue;
            }
            let value = args.next().ok_or_else(|| {
                MemoryError::InvalidConfig("you must specify a size in KB after -zone".into())
            })?;
            self.zone_kilobytes = value.as_ref().parse().map_err(|_| {
                MemoryError::InvalidConfig(format!(
                    "-zone expects a size in KB, got {:?}",
                    value.as_ref()
                ))
            })?;
        }
        Ok(())
    }

    /// Zone capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn zone_size(&self) -> usize {
        self.zone_kilobytes.saturating_mul(1024)
    }

    /// Checks that the sizes describe a usable system.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an empty or oversized store, or a zone that is
    /// too small or does not fit in the store.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.store_size == 0 || self.store_size > MAX_STORE_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "store size {} must be between 1 and {MAX_STORE_SIZE} bytes",
                self.store_size
            )));
        }
        let zone = self.zone_size();
        if zone < 2 * BLOCK_HEADER + MIN_FRAGMENT {
            return Err(MemoryError::InvalidConfig(format!(
                "zone of {zone} bytes is too small"
            )));
        }
        if zone.saturating_add(RECORD_HEADER) > self.store_size {
            return Err(MemoryError::InvalidConfig(format!(
                "zone of {zone} bytes does not fit in a {} byte store",
                self.store_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.store_size, 8 * 1024 * 1024);
        assert_eq!(config.zone_size(), 0xc000);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_partial_override() {
        let config = MemoryConfig::from_toml_str("zone_kilobytes = 96").unwrap();
        assert_eq!(config.zone_kilobytes, 96);
        assert_eq!(config.store_size, DEFAULT_STORE_SIZE);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let err = MemoryConfig::from_toml_str("heap = 3").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_zone_argument() {
        let mut config = MemoryConfig::default();
        config
            .apply_args(["-basedir", "id1", "-zone", "256"])
            .unwrap();
        assert_eq!(config.zone_size(), 256 * 1024);
    }

    #[test]
    fn test_zone_argument_errors() {
        let mut config = MemoryConfig::default();
        assert!(config.apply_args(["-zone"]).is_err());
        assert!(config.apply_args(["-zone", "lots"]).is_err());
        // Failed parses leave the previous value in place.
        assert_eq!(config.zone_size(), DEFAULT_ZONE_SIZE);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let empty = MemoryConfig {
            store_size: 0,
            ..MemoryConfig::default()
        };
        assert!(empty.validate().is_err());

        let crowded = MemoryConfig {
            store_size: 64 * 1024,
            zone_kilobytes: 64,
        };
        assert!(crowded.validate().is_err());

        let tiny_zone = MemoryConfig {
            zone_kilobytes: 0,
            ..MemoryConfig::default()
        };
        assert!(tiny_zone.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = MemoryConfig::load("/nonexistent/oroboros/memory.toml").unwrap_err();
        assert!(matches!(err, MemoryError::Io(_)));
    }
}
