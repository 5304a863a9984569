//! Configuration: pipeline behaviour, cache settings and the INI file.

mod file;
mod parser;
mod pipeline;
mod size;

pub use file::{
    config_directory, config_file_path, CacheSettings, ConfigFile, ConfigFileError,
    DEFAULT_DISK_CACHE_SIZE, DEFAULT_MEMORY_CACHE_ENTRIES, DEFAULT_MEMORY_CACHE_SIZE,
};
pub use pipeline::{
    PipelineConfig, RateLimitConfig, DEFAULT_CACHE_IO_CONCURRENCY, DEFAULT_DECODING_CONCURRENCY,
    DEFAULT_PROCESSING_CONCURRENCY, DEFAULT_RATE_LIMIT_CAPACITY, DEFAULT_RATE_LIMIT_PER_SECOND,
};
pub use size::{format_size, parse_size, SizeParseError};
