//! Collaborator traits consumed by the pipeline.
//!
//! The pipeline only orchestrates. Fetching bytes, decoding, processing and
//! storage are provided through the traits below and injected at
//! construction time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Image Pipeline                          │
//! │                                                              │
//! │  Stages depend on these trait abstractions:                 │
//! │  • Transport      - Stream the original bytes               │
//! │  • Decoder        - Turn bytes into an image                │
//! │  • ImageProcessor - Transform a decoded image               │
//! │  • ImageCache     - Fast in-memory image tier               │
//! │  • DataCache      - Slow persistent byte tier               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Adapter Implementations                    │
//! │                                                              │
//! │  • ReqwestTransport → Transport                             │
//! │  • ImageRsDecoder   → Decoder                               │
//! │  • Resize, Grayscale, GaussianBlur → ImageProcessor         │
//! │  • MemoryImageCache → ImageCache                            │
//! │  • DiskDataCache    → DataCache                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{DecodingError, ProcessingError, TransportError};
use crate::image::{ImageContainer, ResponseInfo};
use crate::keys::ImageCacheKey;
use crate::request::Priority;
use bytes::Bytes;
use futures::stream::BoxStream;
use image::DynamicImage;
use tokio::sync::watch;

// ============================================================================
// Transport
// ============================================================================

/// Resume a previously interrupted download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeFrom {
    /// Number of bytes already held by the pipeline
    pub offset: u64,
    /// ETag or Last-Modified of the original response
    pub validator: String,
}

/// A single fetch handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    /// Effective priority of the fetch; updated while the transfer runs
    pub priority: watch::Receiver<Priority>,
    pub resume: Option<ResumeFrom>,
}

/// One item of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Headers arrived. Always the first item of a successful transfer.
    Response(ResponseInfo),
    /// A chunk of the body
    Chunk(Bytes),
}

/// Ordered sequence of transfer events. End of stream means completion.
pub type TransportStream = BoxStream<'static, Result<TransportEvent, TransportError>>;

/// Performs byte-level fetches.
///
/// Dropping the returned stream cancels the transfer. Implementations
/// must tolerate being dropped after the transfer already finished.
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, request: TransportRequest) -> TransportStream;
}

// ============================================================================
// Decoder
// ============================================================================

/// Decodes accumulated bytes into an image.
///
/// Called from a blocking worker thread. With `is_final == false` the data
/// is a prefix of the payload and the decoder may return a partial image
/// or an error, which the pipeline ignores.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, data: &[u8], is_final: bool) -> Result<DynamicImage, DecodingError>;
}

// ============================================================================
// Processor
// ============================================================================

/// A pure image transformation.
///
/// The identifier takes part in cache and task keys: two processors with
/// the same identifier must produce the same output.
pub trait ImageProcessor: Send + Sync + 'static {
    fn identifier(&self) -> &str;

    fn process(&self, image: &DynamicImage) -> Result<DynamicImage, ProcessingError>;
}

// ============================================================================
// Caches
// ============================================================================

/// Fast in-memory tier holding decoded images.
///
/// Called from the pipeline's serialized context, so implementations must
/// not block.
pub trait ImageCache: Send + Sync + 'static {
    fn get(&self, key: &ImageCacheKey) -> Option<ImageContainer>;

    fn insert(&self, key: ImageCacheKey, container: ImageContainer);

    fn remove(&self, key: &ImageCacheKey);

    fn remove_all(&self);
}

/// Slow persistent tier holding original bytes keyed by URL.
///
/// Always called from a blocking worker thread.
pub trait DataCache: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Bytes>;

    fn store(&self, key: &str, data: Bytes);

    fn contains(&self, key: &str) -> bool;

    fn remove(&self, key: &str);
}
