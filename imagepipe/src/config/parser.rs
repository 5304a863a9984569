//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to settings.
//! Unknown sections and keys are ignored.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::{ConfigFile, ConfigFileError};
use super::pipeline::{RateLimitConfig, DEFAULT_RATE_LIMIT_CAPACITY, DEFAULT_RATE_LIMIT_PER_SECOND};
use super::size::parse_size;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();
    let mut pipeline = config.pipeline;

    // [pipeline] section
    if let Some(section) = ini.section(Some("pipeline")) {
        if let Some(v) = section.get("coalescing") {
            pipeline = pipeline.with_coalescing(parse_bool(v));
        }
        if let Some(v) = section.get("progressive_decoding") {
            pipeline = pipeline.with_progressive_decoding(parse_bool(v));
        }
        if let Some(v) = section.get("store_previews_in_memory_cache") {
            pipeline = pipeline.with_store_previews_in_memory_cache(parse_bool(v));
        }
        if let Some(v) = section.get("resumable_data") {
            pipeline = pipeline.with_resumable_data(parse_bool(v));
        }
    }

    // [rate_limiter] section
    if let Some(section) = ini.section(Some("rate_limiter")) {
        let enabled = section.get("enabled").map(parse_bool).unwrap_or(true);
        if enabled {
            let capacity = parse_positive(section, "rate_limiter", "capacity")?
                .unwrap_or(DEFAULT_RATE_LIMIT_CAPACITY);
            let per_second = parse_positive::<u32>(section, "rate_limiter", "per_second")?
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_SECOND);
            pipeline = pipeline.with_rate_limiter(Some(RateLimitConfig::per_second(capacity, per_second)));
        } else {
            pipeline = pipeline.with_rate_limiter(None);
        }
    }

    // [decoding] section
    if let Some(section) = ini.section(Some("decoding")) {
        if let Some(n) = parse_positive(section, "decoding", "concurrency")? {
            pipeline = pipeline.with_decoding_concurrency(n);
        }
    }

    // [processing] section
    if let Some(section) = ini.section(Some("processing")) {
        if let Some(n) = parse_positive(section, "processing", "concurrency")? {
            pipeline = pipeline.with_processing_concurrency(n);
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(n) = parse_positive(section, "cache", "io_concurrency")? {
            pipeline = pipeline.with_cache_io_concurrency(n);
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = parse_size_value("cache", "memory_size", v)?;
        }
        if let Some(n) = parse_positive(section, "cache", "memory_entries")? {
            config.cache.memory_entries = n;
        }
        if let Some(v) = section.get("disk_directory") {
            let v = v.trim();
            config.cache.disk_directory = match v.to_lowercase().as_str() {
                "" | "none" | "off" => None,
                _ => Some(expand_tilde(v)),
            };
        }
        if let Some(v) = section.get("disk_size") {
            config.cache.disk_size = parse_size_value("cache", "disk_size", v)?;
        }
    }

    config.pipeline = pipeline;
    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_positive<T>(
    properties: &Properties,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(v) = properties.get(key) else {
        return Ok(None);
    };
    match v.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(Some(n)),
        _ => Err(invalid(section, key, v, "must be a positive integer")),
    }
}

fn parse_size_value(section: &str, key: &str, value: &str) -> Result<usize, ConfigFileError> {
    parse_size(value)
        .map_err(|_| invalid(section, key, value, "expected format like '512MB', '2GB', or '1024KB'"))
}

/// Parse a boolean value from config (accepts true/false, 1/0, yes/no, on/off).
pub(super) fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        ConfigFile::parse(content)
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_pipeline_section() {
        let config = parse(
            "[pipeline]\ncoalescing = no\nprogressive_decoding = yes\nresumable_data = off\n",
        )
        .unwrap();
        assert!(!config.pipeline.coalescing());
        assert!(config.pipeline.progressive_decoding());
        assert!(!config.pipeline.resumable_data());
    }

    #[test]
    fn test_rate_limiter_section() {
        let config = parse("[rate_limiter]\ncapacity = 1\nper_second = 10\n").unwrap();
        let limiter = config.pipeline.rate_limiter().unwrap();
        assert_eq!(limiter.capacity(), 1);
        assert_eq!(limiter.refill_interval(), Duration::from_millis(100));

        let config = parse("[rate_limiter]\nenabled = false\n").unwrap();
        assert!(config.pipeline.rate_limiter().is_none());
    }

    #[test]
    fn test_concurrency_sections() {
        let config = parse(
            "[decoding]\nconcurrency = 3\n[processing]\nconcurrency = 5\n[cache]\nio_concurrency = 7\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.decoding_concurrency(), 3);
        assert_eq!(config.pipeline.processing_concurrency(), 5);
        assert_eq!(config.pipeline.cache_io_concurrency(), 7);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse("[decoding]\nconcurrency = 0\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "decoding");
                assert_eq!(key, "concurrency");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cache_section() {
        let config = parse(
            "[cache]\nmemory_size = 32MB\nmemory_entries = 50\ndisk_directory = /tmp/imgs\ndisk_size = 1GB\n",
        )
        .unwrap();
        assert_eq!(config.cache.memory_size, 32 * 1024 * 1024);
        assert_eq!(config.cache.memory_entries, 50);
        assert_eq!(config.cache.disk_directory, Some(PathBuf::from("/tmp/imgs")));
        assert_eq!(config.cache.disk_size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_disk_cache_can_be_disabled() {
        let config = parse("[cache]\ndisk_directory = none\n").unwrap();
        assert!(config.cache.disk_directory.is_none());
    }

    #[test]
    fn test_invalid_size_rejected() {
        let err = parse("[cache]\nmemory_size = lots\n").unwrap_err();
        assert!(err.to_string().contains("cache.memory_size"));
    }

    #[test]
    fn test_parse_bool() {
        for v in ["true", "1", "YES", " on "] {
            assert!(parse_bool(v), "{v}");
        }
        for v in ["false", "0", "no", "off", "maybe"] {
            assert!(!parse_bool(v), "{v}");
        }
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x"), home.join("x"));
        }
    }
}
