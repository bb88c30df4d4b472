//! Engine configuration.
//!
//! Loaded from `<config_dir>/lastlook/config.json`; every field has a default so
//! a partial (or absent) file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{TransferError, TransferResult};
use crate::hashing::HashAlgorithm;

pub const CONFIG_DIR_NAME: &str = "lastlook";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Modification times closer than this are considered equal. FAT-family
/// filesystems store mtimes with 2 s granularity.
pub const DEFAULT_SMART_RESUME_TOLERANCE_MS: u64 = 3000;
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Product name stamped into manifest provenance
    pub app_name: String,

    /// Smart-Resume mtime tolerance in milliseconds
    pub smart_resume_tolerance_ms: u64,

    /// Read/write buffer used by the native copier
    pub copy_buffer_size: usize,

    /// Content hash recorded in the manifest
    pub hash_algorithm: HashAlgorithm,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "LastLook".to_string(),
            smart_resume_tolerance_ms: DEFAULT_SMART_RESUME_TOLERANCE_MS,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            hash_algorithm: HashAlgorithm::Xxh3_64,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load the user configuration, falling back to defaults when no file exists.
    pub fn load() -> TransferResult<Self> {
        match Self::config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> TransferResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            TransferError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Version string recorded as the manifest's `app_version`.
    pub fn app_version(&self) -> String {
        format!("{} v{}", self.app_name, env!("CARGO_PKG_VERSION"))
    }

    fn validate(&self) -> TransferResult<()> {
        if self.copy_buffer_size == 0 {
            return Err(TransferError::Config(
                "copy_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
