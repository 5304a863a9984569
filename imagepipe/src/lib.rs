//! imagepipe - coalescing image loading pipeline
//!
//! This library fetches, decodes and processes remote images on behalf of
//! many concurrent callers. Identical work is shared between callers at
//! every stage, each caller keeps its own priority and can cancel without
//! affecting the others, and new fetches are smoothed by a rate limiter.
//!
//! # High-Level API
//!
//! ```ignore
//! use imagepipe::adapters::{Grayscale, ImageRsDecoder, ReqwestTransport};
//! use imagepipe::cache::MemoryImageCache;
//! use imagepipe::{ImagePipeline, ImageRequest, PipelineComponents, PipelineConfig};
//! use std::sync::Arc;
//!
//! let components = PipelineComponents::new(Arc::new(ReqwestTransport::new()?), Arc::new(ImageRsDecoder))
//!     .with_image_cache(Arc::new(MemoryImageCache::new(64 * 1024 * 1024, 500)));
//! let pipeline = ImagePipeline::new(PipelineConfig::default(), components);
//!
//! let image = pipeline
//!     .image(ImageRequest::new("https://example.com/a.jpg").with_processor(Grayscale))
//!     .await?;
//! ```

pub mod adapters;
pub mod cache;
pub mod callback;
pub mod config;
pub mod error;
pub mod image;
pub mod keys;
pub mod logging;
pub mod pipeline;
pub mod prefetch;
pub mod rate_limiter;
pub mod request;
pub mod resumable;
pub mod task;
pub mod telemetry;
pub mod traits;
pub mod worker;

pub use callback::CallbackQueue;
pub use config::{PipelineConfig, RateLimitConfig};
pub use error::{DecodingError, PipelineError, ProcessingError, TransportError};
pub use crate::image::{CacheType, DataResponse, ImageContainer, ImageResponse, Progress};
pub use pipeline::{ImagePipeline, ImageTask, PipelineComponents, TaskCallbacks, TaskUpdate};
pub use request::{ImageRequest, Priority, RequestOptions};

/// Version of the imagepipe library and CLI.
///
/// Taken from `Cargo.toml` at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
