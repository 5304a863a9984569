//! Pipeline behaviour configuration.

use std::time::Duration;

/// Default burst size of the fetch rate limiter.
pub const DEFAULT_RATE_LIMIT_CAPACITY: usize = 25;

/// Default refill rate of the fetch rate limiter (admissions per second).
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 80;

/// Default number of concurrent decodes.
pub const DEFAULT_DECODING_CONCURRENCY: usize = 1;

/// Default number of concurrent processor chains.
pub const DEFAULT_PROCESSING_CONCURRENCY: usize = 2;

/// Default number of concurrent disk cache operations.
pub const DEFAULT_CACHE_IO_CONCURRENCY: usize = 2;

/// Token bucket parameters for fetch admission.
///
/// ```
/// use imagepipe::config::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::default();
/// assert_eq!(config.capacity(), 25);
/// assert_eq!(config.refill_interval(), Duration::from_micros(12_500));
///
/// let config = RateLimitConfig::new(1, Duration::from_millis(100));
/// assert_eq!(config.capacity(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    capacity: usize,
    refill_interval: Duration,
}

/// Shortest refill interval accepted by [`RateLimitConfig::new`].
pub const MIN_REFILL_INTERVAL: Duration = Duration::from_millis(1);

impl RateLimitConfig {
    /// A capacity below 1 is raised to 1 and an interval below
    /// [`MIN_REFILL_INTERVAL`] is raised to it.
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_interval: refill_interval.max(MIN_REFILL_INTERVAL),
        }
    }

    /// Builds a bucket refilled `per_second` times a second.
    pub fn per_second(capacity: usize, per_second: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1) / per_second.max(1))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(DEFAULT_RATE_LIMIT_CAPACITY, DEFAULT_RATE_LIMIT_PER_SECOND)
    }
}

/// Configuration of an [`ImagePipeline`](crate::ImagePipeline).
///
/// ```
/// use imagepipe::config::PipelineConfig;
///
/// let config = PipelineConfig::new()
///     .with_coalescing(false)
///     .with_progressive_decoding(true)
///     .with_processing_concurrency(4);
///
/// assert!(!config.coalescing());
/// assert!(config.progressive_decoding());
/// assert_eq!(config.processing_concurrency(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    coalescing: bool,
    rate_limiter: Option<RateLimitConfig>,
    progressive_decoding: bool,
    store_previews_in_memory_cache: bool,
    resumable_data: bool,
    decoding_concurrency: usize,
    processing_concurrency: usize,
    cache_io_concurrency: usize,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share in-flight work between requests with equal stage keys.
    /// Default: enabled.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalescing = enabled;
        self
    }

    /// Pace the start of network fetches. `None` disables the limiter.
    pub fn with_rate_limiter(mut self, limiter: Option<RateLimitConfig>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Decode partial data and deliver previews. Default: disabled.
    pub fn with_progressive_decoding(mut self, enabled: bool) -> Self {
        self.progressive_decoding = enabled;
        self
    }

    /// Also store progressive previews in the memory cache. Default: disabled.
    pub fn with_store_previews_in_memory_cache(mut self, enabled: bool) -> Self {
        self.store_previews_in_memory_cache = enabled;
        self
    }

    /// Keep partial downloads for range resumption. Default: enabled.
    pub fn with_resumable_data(mut self, enabled: bool) -> Self {
        self.resumable_data = enabled;
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_decoding_concurrency(mut self, concurrency: usize) -> Self {
        self.decoding_concurrency = concurrency.max(1);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_processing_concurrency(mut self, concurrency: usize) -> Self {
        self.processing_concurrency = concurrency.max(1);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_cache_io_concurrency(mut self, concurrency: usize) -> Self {
        self.cache_io_concurrency = concurrency.max(1);
        self
    }

    pub fn coalescing(&self) -> bool {
        self.coalescing
    }

    pub fn rate_limiter(&self) -> Option<RateLimitConfig> {
        self.rate_limiter
    }

    pub fn progressive_decoding(&self) -> bool {
        self.progressive_decoding
    }

    pub fn store_previews_in_memory_cache(&self) -> bool {
        self.store_previews_in_memory_cache
    }

    pub fn resumable_data(&self) -> bool {
        self.resumable_data
    }

    pub fn decoding_concurrency(&self) -> usize {
        self.decoding_concurrency
    }

    pub fn processing_concurrency(&self) -> usize {
        self.processing_concurrency
    }

    pub fn cache_io_concurrency(&self) -> usize {
        self.cache_io_concurrency
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coalescing: true,
            rate_limiter: Some(RateLimitConfig::default()),
            progressive_decoding: false,
            store_previews_in_memory_cache: false,
            resumable_data: true,
            decoding_concurrency: DEFAULT_DECODING_CONCURRENCY,
            processing_concurrency: DEFAULT_PROCESSING_CONCURRENCY,
            cache_io_concurrency: DEFAULT_CACHE_IO_CONCURRENCY,
        }
    }
}
