//! Coalescing image pipeline.
//!
//! [`ImagePipeline`] is the public entry point. Every submission creates an
//! [`ImageTask`] handle and is forwarded to the pipeline's daemon, which
//! resolves the request into a graph of shared tasks:
//!
//! ```text
//! submit_image → LoadImage → [ProcessImage] → FetchDecodedImage → FetchOriginalData → Transport
//! submit_data  → LoadData  ─────────────────────────────────────► FetchOriginalData
//! ```
//!
//! # Request Coalescing
//!
//! Each stage is keyed by the parts of the request that affect its output.
//! Requests with equal keys at a stage share one task there, so two loads of
//! the same URL with different processors fetch and decode once and process
//! twice. A task keeps running while any subscriber still wants it.
//!
//! # Example
//!
//! ```ignore
//! use imagepipe::adapters::{ImageRsDecoder, ReqwestTransport, Resize};
//! use imagepipe::pipeline::{ImagePipeline, PipelineComponents};
//! use imagepipe::{ImageRequest, PipelineConfig};
//! use std::sync::Arc;
//!
//! let components = PipelineComponents::new(
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(ImageRsDecoder),
//! );
//! let pipeline = ImagePipeline::new(PipelineConfig::default(), components);
//!
//! let request = ImageRequest::new("https://example.com/a.png").with_processor(Resize::new(64, 64));
//! let response = pipeline.image(request).await?;
//! ```

mod callbacks;
mod daemon;
mod handle;
mod nodes;

pub use callbacks::{TaskCallbacks, TaskUpdate};
pub use handle::{ImageTask, ImageTaskId, TaskKind, TaskStatus};

use crate::callback::CallbackQueue;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::image::{DataResponse, ImageResponse};
use crate::rate_limiter::RateLimiter;
use crate::request::{ImageRequest, Priority};
use crate::resumable::{PipelineId, ResumableDataRegistry};
use crate::task::PoolStats;
use crate::telemetry::{LifecycleObserver, NullObserver};
use crate::traits::{DataCache, Decoder, ImageCache, Transport};
use crate::worker::{WorkerPool, WorkerStats};
use callbacks::Delivery;
use daemon::{Command, PipelineDaemon};
use nodes::StageEnv;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Name of the default callback thread.
const CALLBACK_THREAD_NAME: &str = "imagepipe-callbacks";

/// Collaborators injected into a pipeline.
pub struct PipelineComponents {
    pub transport: Arc<dyn Transport>,
    pub decoder: Arc<dyn Decoder>,
    pub image_cache: Option<Arc<dyn ImageCache>>,
    pub data_cache: Option<Arc<dyn DataCache>>,
    pub observer: Arc<dyn LifecycleObserver>,
    /// Default queue for callbacks; a dedicated serial thread when `None`
    pub callback_queue: Option<CallbackQueue>,
    /// Shared registry for partial downloads; `None` disables resumption
    pub resumable: Option<Arc<ResumableDataRegistry>>,
}

impl PipelineComponents {
    /// Components with no caches, a null observer and a private resumable
    /// data registry.
    pub fn new(transport: Arc<dyn Transport>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            transport,
            decoder,
            image_cache: None,
            data_cache: None,
            observer: Arc::new(NullObserver),
            callback_queue: None,
            resumable: Some(Arc::new(ResumableDataRegistry::default())),
        }
    }

    pub fn with_image_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    pub fn with_data_cache(mut self, cache: Arc<dyn DataCache>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_callback_queue(mut self, queue: CallbackQueue) -> Self {
        self.callback_queue = Some(queue);
        self
    }

    pub fn with_resumable_registry(mut self, registry: Option<Arc<ResumableDataRegistry>>) -> Self {
        self.resumable = registry;
        self
    }
}

/// Snapshot of the daemon's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Tasks currently in the pool, across all stages
    pub live_tasks: usize,
    /// Handles waiting for a result
    pub tracked_handles: usize,
    pub coalescing: PoolStats,
    pub decoding: WorkerStats,
    pub processing: WorkerStats,
    pub cache_io: WorkerStats,
    pub invalidated: bool,
}

struct Shared {
    id: PipelineId,
    config: PipelineConfig,
    commands: mpsc::UnboundedSender<Command>,
    invalidated: AtomicBool,
    callback_queue: CallbackQueue,
}

/// Handle to a running pipeline.
///
/// Cloning is cheap and shares the same daemon. The daemon stops once every
/// clone is dropped, cancelling any handle still waiting.
#[derive(Clone)]
pub struct ImagePipeline {
    shared: Arc<Shared>,
}

impl ImagePipeline {
    /// Starts a pipeline.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(config: PipelineConfig, components: PipelineComponents) -> Self {
        let id = PipelineId::next();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        let callback_queue = components
            .callback_queue
            .unwrap_or_else(default_callback_queue);
        let rate_limiter = config
            .rate_limiter()
            .map(|limits| Arc::new(RateLimiter::from_config(&limits)));

        let env = StageEnv {
            pipeline_id: id,
            config,
            transport: components.transport,
            decoder: components.decoder,
            image_cache: components.image_cache,
            data_cache: components.data_cache,
            rate_limiter,
            resumable: components.resumable,
            decoding: WorkerPool::new("decoding", config.decoding_concurrency()),
            processing: WorkerPool::new("processing", config.processing_concurrency()),
            cache_io: WorkerPool::new("cache_io", config.cache_io_concurrency()),
            messages: messages_tx,
        };

        info!(
            pipeline = %id,
            coalescing = config.coalescing(),
            rate_limited = config.rate_limiter().is_some(),
            progressive = config.progressive_decoding(),
            "Starting image pipeline"
        );

        let daemon = PipelineDaemon::new(env, components.observer, commands_rx, messages_rx);
        tokio::spawn(daemon.run());

        Self {
            shared: Arc::new(Shared {
                id,
                config,
                commands: commands_tx,
                invalidated: AtomicBool::new(false),
                callback_queue,
            }),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.shared.id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Loads, decodes and processes an image.
    pub fn submit_image(&self, request: ImageRequest, callbacks: TaskCallbacks<ImageResponse>) -> ImageTask {
        let delivery = Delivery::image(callbacks, &self.shared.callback_queue);
        self.submit(TaskKind::Image, request, delivery)
    }

    /// Loads the original bytes of a resource.
    pub fn submit_data(&self, request: ImageRequest, callbacks: TaskCallbacks<DataResponse>) -> ImageTask {
        let delivery = Delivery::data(callbacks, &self.shared.callback_queue);
        self.submit(TaskKind::Data, request, delivery)
    }

    fn submit(&self, kind: TaskKind, request: ImageRequest, delivery: Delivery) -> ImageTask {
        let handle = ImageTask::new(kind, request, self.shared.commands.downgrade());

        if self.is_invalidated() {
            handle.reject();
            delivery.fail(PipelineError::PipelineInvalidated);
            return handle;
        }

        let command = Command::Submit {
            handle: handle.clone(),
            delivery,
        };
        if let Err(mpsc::error::SendError(Command::Submit { handle, delivery })) = self.shared.commands.send(command) {
            handle.reject();
            delivery.fail(PipelineError::PipelineInvalidated);
        }
        handle
    }

    /// Cancels a handle. Idempotent.
    pub fn cancel(&self, task: &ImageTask) {
        task.cancel();
    }

    /// Changes a handle's priority. No-op once the handle is terminal.
    pub fn update_priority(&self, task: &ImageTask, priority: Priority) {
        task.set_priority(priority);
    }

    /// Rejects all future submissions and cancels every tracked handle.
    /// Idempotent.
    pub fn invalidate(&self) {
        if self.shared.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.commands.send(Command::Invalidate);
    }

    pub fn is_invalidated(&self) -> bool {
        self.shared.invalidated.load(Ordering::Acquire)
    }

    /// Loads an image. Dropping the future cancels the load.
    pub async fn image(&self, request: ImageRequest) -> Result<ImageResponse, PipelineError> {
        let (tx, rx) = oneshot::channel();
        let callbacks = TaskCallbacks::new(move |result: Result<ImageResponse, PipelineError>| {
            let _ = tx.send(result);
        })
        .on_queue(CallbackQueue::Inline);

        let _guard = CancelOnDrop(self.submit_image(request, callbacks));
        rx.await.unwrap_or_else(|_| Err(completion_dropped()))
    }

    /// Loads the original bytes. Dropping the future cancels the load.
    pub async fn data(&self, request: ImageRequest) -> Result<DataResponse, PipelineError> {
        let (tx, rx) = oneshot::channel();
        let callbacks = TaskCallbacks::new(move |result: Result<DataResponse, PipelineError>| {
            let _ = tx.send(result);
        })
        .on_queue(CallbackQueue::Inline);

        let _guard = CancelOnDrop(self.submit_data(request, callbacks));
        rx.await.unwrap_or_else(|_| Err(completion_dropped()))
    }

    /// Current daemon state, or `None` if the daemon has stopped.
    pub async fn stats(&self) -> Option<PipelineStats> {
        let (reply, rx) = oneshot::channel();
        self.shared.commands.send(Command::Stats { reply }).ok()?;
        rx.await.ok()
    }
}

impl fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Cancels the handle when dropped. A no-op once the handle is terminal.
struct CancelOnDrop(ImageTask);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn completion_dropped() -> PipelineError {
    PipelineError::Internal("completion callback dropped".to_string())
}

fn default_callback_queue() -> CallbackQueue {
    match CallbackQueue::serial(CALLBACK_THREAD_NAME) {
        Ok(queue) => queue,
        Err(e) => {
            warn!(error = %e, "Failed to start callback thread, running callbacks inline");
            CallbackQueue::Inline
        }
    }
}
