//! `DiskConfig` — loadable, validated configuration for a `Disk` (§6, §9(b)).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::file::METADATA_SIZE;
use crate::record::{HEADER_SIZE, VARINT_MAX};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    pub root_dir: PathBuf,
    pub block_size: usize,
    pub num_blocks: u32,
    /// Maximum number of *sealed* files retained per metric; the ring
    /// holds `files_per_metric` total (this plus the active file).
    pub files_per_metric: u32,
    pub handle_cache_size: usize,
    pub buffer_cache_size: usize,
}

impl Default for DiskConfig {
    fn default() -> Self {
        DiskConfig {
            root_dir: PathBuf::from("./data"),
            block_size: 1024,
            num_blocks: 10,
            files_per_metric: 10,
            handle_cache_size: 64,
            buffer_cache_size: 64,
        }
    }
}

impl DiskConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::InvalidArgument(format!("invalid config: {e}")))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Enforce the invariant that every file must be able to hold a
    /// metadata block plus at least one record whose varint-framed
    /// timestamps (`start`, `end`) fit alongside a non-empty payload.
    pub fn validate(&self) -> Result<()> {
        // Block 0 holds a framed `FileMetadata` record; data blocks hold a
        // framed logical record whose own header needs at least a
        // zero-payload pair of varint timestamps.
        let min_block_size = (HEADER_SIZE + METADATA_SIZE).max(HEADER_SIZE + 2 * VARINT_MAX);
        if self.block_size < min_block_size {
            return Err(EngineError::InvalidArgument(format!(
                "block_size {} is below the minimum {min_block_size} (must fit both the block-0 metadata record and a data record's header)",
                self.block_size
            )));
        }
        if self.block_size - HEADER_SIZE > u16::MAX as usize {
            return Err(EngineError::InvalidArgument(format!(
                "block_size {} yields a payload larger than the record codec's u16 size field ({})",
                self.block_size,
                u16::MAX
            )));
        }
        if self.num_blocks < 2 {
            return Err(EngineError::InvalidArgument(
                "num_blocks must be at least 2 (one metadata block, one data block)".into(),
            ));
        }
        if self.handle_cache_size == 0 {
            return Err(EngineError::InvalidArgument(
                "handle_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        DiskConfig::default().validate().unwrap();
    }

    #[test]
    fn undersized_block_size_rejected() {
        let mut cfg = DiskConfig::default();
        cfg.block_size = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn block_size_too_small_for_metadata_record_rejected() {
        // Fits a zero-payload data record (>= 24) but not the block-0
        // metadata record (>= 41).
        let mut cfg = DiskConfig::default();
        cfg.block_size = 32;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn block_size_at_metadata_floor_validates() {
        let mut cfg = DiskConfig::default();
        cfg.block_size = HEADER_SIZE + METADATA_SIZE;
        cfg.validate().unwrap();
    }

    #[test]
    fn block_size_exceeding_u16_payload_rejected() {
        let mut cfg = DiskConfig::default();
        cfg.block_size = HEADER_SIZE + u16::MAX as usize + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = DiskConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed = DiskConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.block_size, cfg.block_size);
        assert_eq!(parsed.root_dir, cfg.root_dir);
    }
}
