//! Configuration file handling for `~/.imagepipe/config.ini`.
//!
//! ```ini
//! [pipeline]
//! coalescing = true
//! progressive_decoding = false
//! store_previews_in_memory_cache = false
//! resumable_data = true
//!
//! [rate_limiter]
//! enabled = true
//! capacity = 25
//! per_second = 80
//!
//! [decoding]
//! concurrency = 1
//!
//! [processing]
//! concurrency = 2
//!
//! [cache]
//! memory_size = 128MB
//! memory_entries = 1000
//! disk_directory = ~/.cache/imagepipe
//! disk_size = 512MB
//! io_concurrency = 2
//! ```

use super::pipeline::PipelineConfig;
use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default memory cache budget.
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 128 * 1024 * 1024;

/// Default memory cache entry limit.
pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 1000;

/// Default disk cache budget.
pub const DEFAULT_DISK_CACHE_SIZE: usize = 512 * 1024 * 1024;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Cache storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Memory cache budget in bytes (0 disables the memory cache)
    pub memory_size: usize,
    pub memory_entries: usize,
    /// Disk cache location; `None` disables the disk cache
    pub disk_directory: Option<PathBuf>,
    pub disk_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_CACHE_SIZE,
            memory_entries: DEFAULT_MEMORY_CACHE_ENTRIES,
            disk_directory: dirs::cache_dir().map(|d| d.join("imagepipe")),
            disk_size: DEFAULT_DISK_CACHE_SIZE,
        }
    }
}

/// Everything that can be set from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub pipeline: PipelineConfig,
    pub cache: CacheSettings,
}

impl ConfigFile {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content).map_err(ini::Error::Parse)?;
        super::parser::parse_ini(&ini)
    }
}

/// Get the path to the config directory (~/.imagepipe).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".imagepipe")
}

/// Get the path to the config file (~/.imagepipe/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
