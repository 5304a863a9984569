//! Image requests, priorities and per-request cache options.
//!
//! An [`ImageRequest`] names a source, an ordered list of processors and
//! the cache policy for this particular load. The pipeline derives a
//! separate key for every stage from it (see [`crate::keys`]), so only the
//! options that matter to a stage take part in that stage's identity.

use crate::traits::ImageProcessor;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Priority
// =============================================================================

/// Scheduling priority of a request.
///
/// Ordered from lowest to highest so that the effective priority of a
/// shared task is simply the maximum over its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl Priority {
    /// All priorities in ascending order.
    pub const ALL: [Priority; 5] = [
        Priority::VeryLow,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::VeryHigh,
    ];

    /// Lowercase name used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::VeryLow => "very_low",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request Options
// =============================================================================

/// Cache policy for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    /// Look up the final image in the memory cache
    pub memory_cache_reads: bool,
    /// Store the final image in the memory cache
    pub memory_cache_writes: bool,
    /// Look up original bytes in the disk cache
    pub disk_cache_reads: bool,
    /// Store original bytes in the disk cache
    pub disk_cache_writes: bool,
    /// Fail with `DataMissingInCache` instead of going to the network
    pub return_cache_data_dont_load: bool,
}

impl RequestOptions {
    /// Disables every cache read but keeps writes, forcing a fresh load.
    pub fn reload_ignoring_cached_data(mut self) -> Self {
        self.memory_cache_reads = false;
        self.disk_cache_reads = false;
        self
    }

    /// Only return data already present in a cache.
    pub fn return_cache_data_dont_load(mut self) -> Self {
        self.return_cache_data_dont_load = true;
        self
    }

    /// Skips the memory cache in both directions.
    pub fn disable_memory_cache(mut self) -> Self {
        self.memory_cache_reads = false;
        self.memory_cache_writes = false;
        self
    }

    /// Skips the disk cache in both directions.
    pub fn disable_disk_cache(mut self) -> Self {
        self.disk_cache_reads = false;
        self.disk_cache_writes = false;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            memory_cache_reads: true,
            memory_cache_writes: true,
            disk_cache_reads: true,
            disk_cache_writes: true,
            return_cache_data_dont_load: false,
        }
    }
}

// =============================================================================
// Image Request
// =============================================================================

/// A request to load an image (or its raw bytes) from a URL.
///
/// Cheap to clone: processors are shared behind `Arc`.
#[derive(Clone)]
pub struct ImageRequest {
    url: String,
    processors: Vec<Arc<dyn ImageProcessor>>,
    priority: Priority,
    options: RequestOptions,
}

impl ImageRequest {
    /// Creates a request for `url` with default priority and options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            processors: Vec::new(),
            priority: Priority::default(),
            options: RequestOptions::default(),
        }
    }

    /// Appends a processor. Processors run in insertion order.
    pub fn with_processor(mut self, processor: impl ImageProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Appends an already shared processor.
    pub fn with_shared_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Sets the initial priority of the request.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Replaces the cache options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn processors(&self) -> &[Arc<dyn ImageProcessor>] {
        &self.processors
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    /// Identifiers of the processors, in application order.
    pub fn processor_ids(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|p| p.identifier().to_string())
            .collect()
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("url", &self.url)
            .field("processors", &self.processor_ids())
            .field("priority", &self.priority)
            .field("options", &self.options)
            .finish()
    }
}

impl From<&str> for ImageRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for ImageRequest {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}
