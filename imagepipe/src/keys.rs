//! Stage keys and cache keys.
//!
//! Each pipeline stage derives its own key from the request and includes
//! only the options that change that stage's output. Two requests that
//! differ in processors therefore share the fetch and decode stages and
//! diverge at processing.
//!
//! ```text
//! LoadImage      = ProcessedKey + memory cache options
//! ProcessedImage = DataKey + processor identifiers
//! DecodedImage   = DataKey
//! OriginalData   = DataKey = url + disk cache options
//! LoadData       = DataKey
//! ```

use crate::request::ImageRequest;
use std::fmt;

/// Identity of the original bytes of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    url: String,
    disk_cache_reads: bool,
    disk_cache_writes: bool,
    cache_only: bool,
}

impl DataKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        let options = request.options();
        Self {
            url: request.url().to_string(),
            disk_cache_reads: options.disk_cache_reads,
            disk_cache_writes: options.disk_cache_writes,
            cache_only: options.return_cache_data_dont_load,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Identity of a processed image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedKey {
    data: DataKey,
    processors: Vec<String>,
}

impl ProcessedKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        Self {
            data: DataKey::for_request(request),
            processors: request.processor_ids(),
        }
    }

    pub fn data(&self) -> &DataKey {
        &self.data
    }

    pub fn processors(&self) -> &[String] {
        &self.processors
    }
}

/// Identity of a full image load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadImageKey {
    processed: ProcessedKey,
    memory_cache_reads: bool,
    memory_cache_writes: bool,
}

impl LoadImageKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        let options = request.options();
        Self {
            processed: ProcessedKey::for_request(request),
            memory_cache_reads: options.memory_cache_reads,
            memory_cache_writes: options.memory_cache_writes,
        }
    }
}

/// Key under which a live task is registered in the task pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    OriginalData(DataKey),
    DecodedImage(DataKey),
    ProcessedImage(ProcessedKey),
    LoadImage(LoadImageKey),
    LoadData(DataKey),
}

impl TaskKey {
    /// Short stage name for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            TaskKey::OriginalData(_) => "fetch_original_data",
            TaskKey::DecodedImage(_) => "fetch_decoded_image",
            TaskKey::ProcessedImage(_) => "process_image",
            TaskKey::LoadImage(_) => "load_image",
            TaskKey::LoadData(_) => "load_data",
        }
    }
}

/// Memory cache key: source plus processors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageCacheKey {
    url: String,
    processors: Vec<String>,
}

impl ImageCacheKey {
    pub fn new(url: impl Into<String>, processors: Vec<String>) -> Self {
        Self {
            url: url.into(),
            processors,
        }
    }

    pub fn for_request(request: &ImageRequest) -> Self {
        Self::new(request.url(), request.processor_ids())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ImageCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.processors.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}#{}", self.url, self.processors.join(","))
        }
    }
}
