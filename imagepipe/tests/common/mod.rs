//! Shared fixtures for the pipeline integration tests.
//!
//! - [`MockTransport`] either answers every fetch from registered payloads
//!   or hands each fetch to the test as a [`FetchControl`]
//! - [`LengthDecoder`] turns `n` bytes into an `n x 1` image
//! - [`GatedDecoder`] holds every decode until the test opens it
//! - [`Flip`] / [`FailingProcessor`] count their invocations

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc as stream_channel;
use futures::StreamExt;
use image::DynamicImage;
use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, oneshot, watch};

use imagepipe::callback::CallbackQueue;
use imagepipe::error::{DecodingError, ProcessingError, TransportError};
use imagepipe::image::ResponseInfo;
use imagepipe::pipeline::{ImagePipeline, ImageTask, PipelineComponents, TaskCallbacks, TaskUpdate};
use imagepipe::telemetry::{LifecycleEvent, LifecycleObserver};
use imagepipe::traits::{
    Decoder, ImageProcessor, ResumeFrom, Transport, TransportEvent, TransportRequest, TransportStream,
};
use imagepipe::{DataResponse, ImageRequest, ImageResponse, PipelineConfig, PipelineError, Priority};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Awaits `future`, panicking if it takes longer than [`TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out waiting for the pipeline")
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Waits until the daemon has handled every command sent so far.
pub async fn settle(pipeline: &ImagePipeline) {
    within(pipeline.stats()).await.expect("daemon stopped");
}

// ============================================================================
// Transport
// ============================================================================

type Item = Result<TransportEvent, TransportError>;

/// Response metadata for a successful full download.
pub fn ok_response(length: u64) -> ResponseInfo {
    let mut info = ResponseInfo::new(200);
    info.expected_content_length = Some(length);
    info
}

/// Response metadata that allows resuming with `etag`.
pub fn resumable_response(status: u16, length: u64, etag: &str) -> ResponseInfo {
    let mut info = ResponseInfo::new(status);
    info.expected_content_length = Some(length);
    info.etag = Some(etag.to_string());
    info.accepts_ranges = true;
    info
}

/// One in-flight fetch driven by the test.
pub struct FetchControl {
    pub url: String,
    pub resume: Option<ResumeFrom>,
    pub priority: watch::Receiver<Priority>,
    sender: stream_channel::UnboundedSender<Item>,
    dropped: Arc<AtomicBool>,
}

impl FetchControl {
    pub fn respond(&self, info: ResponseInfo) {
        let _ = self.sender.unbounded_send(Ok(TransportEvent::Response(info)));
    }

    pub fn chunk(&self, data: &'static [u8]) {
        let _ = self
            .sender
            .unbounded_send(Ok(TransportEvent::Chunk(Bytes::from_static(data))));
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.sender.unbounded_send(Err(error));
    }

    /// Ends the body.
    pub fn finish(self) {
        self.sender.close_channel();
    }

    pub fn priority(&self) -> Priority {
        *self.priority.borrow()
    }

    /// True once the pipeline dropped the stream.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub async fn wait_dropped(&self) {
        eventually(|| self.is_dropped()).await
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

enum Mode {
    Auto(Mutex<HashMap<String, Bytes>>),
    Manual(mpsc::UnboundedSender<FetchControl>),
}

/// Scriptable transport counting its fetches.
pub struct MockTransport {
    mode: Mode,
    fetches: AtomicUsize,
}

impl MockTransport {
    /// Answers fetches from [`MockTransport::serve`]d payloads, 404 otherwise.
    pub fn auto() -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::Auto(Mutex::new(HashMap::new())),
            fetches: AtomicUsize::new(0),
        })
    }

    /// Hands every fetch to the returned receiver.
    pub fn manual() -> (Arc<Self>, FetchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            mode: Mode::Manual(tx),
            fetches: AtomicUsize::new(0),
        });
        (transport, FetchQueue(rx))
    }

    pub fn serve(&self, url: &str, payload: impl Into<Bytes>) {
        if let Mode::Auto(payloads) = &self.mode {
            payloads.lock().insert(url.to_string(), payload.into());
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn fetch(&self, request: TransportRequest) -> TransportStream {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let (sender, receiver) = stream_channel::unbounded();
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&dropped));

        match &self.mode {
            Mode::Auto(payloads) => {
                match payloads.lock().get(&request.url).cloned() {
                    Some(payload) => {
                        let _ = sender.unbounded_send(Ok(TransportEvent::Response(ok_response(payload.len() as u64))));
                        let middle = payload.len() / 2;
                        for part in [payload.slice(..middle), payload.slice(middle..)] {
                            if !part.is_empty() {
                                let _ = sender.unbounded_send(Ok(TransportEvent::Chunk(part)));
                            }
                        }
                    }
                    None => {
                        let _ = sender.unbounded_send(Err(TransportError::Validation { status: 404 }));
                    }
                }
                sender.close_channel();
            }
            Mode::Manual(controls) => {
                let _ = controls.send(FetchControl {
                    url: request.url,
                    resume: request.resume,
                    priority: request.priority,
                    sender,
                    dropped,
                });
            }
        }

        receiver
            .map(move |item| {
                let _ = &flag;
                item
            })
            .boxed()
    }
}

/// Fetches started by a manual [`MockTransport`].
pub struct FetchQueue(mpsc::UnboundedReceiver<FetchControl>);

impl FetchQueue {
    pub async fn next(&mut self) -> FetchControl {
        within(self.0.recv()).await.expect("transport dropped")
    }

    /// Returns a fetch that has already started, if any.
    pub fn try_next(&mut self) -> Option<FetchControl> {
        self.0.try_recv().ok()
    }
}

// ============================================================================
// Decoder and processors
// ============================================================================

/// Decodes `n` bytes into an `n x 1` image. Payloads starting with `bad`
/// fail.
#[derive(Default)]
pub struct LengthDecoder {
    pub final_decodes: AtomicUsize,
    pub partial_decodes: AtomicUsize,
}

impl LengthDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn final_count(&self) -> usize {
        self.final_decodes.load(Ordering::SeqCst)
    }
}

impl Decoder for LengthDecoder {
    fn decode(&self, data: &[u8], is_final: bool) -> Result<DynamicImage, DecodingError> {
        let counter = if is_final {
            &self.final_decodes
        } else {
            &self.partial_decodes
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if data.starts_with(b"bad") {
            return Err(DecodingError::Malformed("bad payload".to_string()));
        }
        Ok(DynamicImage::new_rgba8(data.len() as u32, 1))
    }
}

/// Records each payload as it starts decoding, then blocks until
/// [`GatedDecoder::open`].
#[derive(Default)]
pub struct GatedDecoder {
    open: Mutex<bool>,
    opened: Condvar,
    started: Mutex<Vec<String>>,
}

impl GatedDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Payloads in the order their decodes started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

impl Decoder for GatedDecoder {
    fn decode(&self, data: &[u8], _is_final: bool) -> Result<DynamicImage, DecodingError> {
        self.started
            .lock()
            .push(String::from_utf8_lossy(data).into_owned());

        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        Ok(DynamicImage::new_rgba8(data.len() as u32, 1))
    }
}

/// Transposes the image, so `n x 1` becomes `1 x n`.
#[derive(Clone, Default)]
pub struct Flip {
    pub calls: Arc<AtomicUsize>,
}

impl ImageProcessor for Flip {
    fn identifier(&self) -> &str {
        "flip"
    }

    fn process(&self, image: &DynamicImage) -> Result<DynamicImage, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(image.rotate90())
    }
}

pub struct FailingProcessor;

impl ImageProcessor for FailingProcessor {
    fn identifier(&self) -> &str {
        "failing"
    }

    fn process(&self, _image: &DynamicImage) -> Result<DynamicImage, ProcessingError> {
        Err(ProcessingError::new("failing", "always fails"))
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// Pipeline helpers
// ============================================================================

/// Components with inline callbacks and no caches.
pub fn components(transport: Arc<MockTransport>, decoder: Arc<LengthDecoder>) -> PipelineComponents {
    PipelineComponents::new(transport, decoder).with_callback_queue(CallbackQueue::Inline)
}

/// Default configuration without rate limiting.
pub fn config() -> PipelineConfig {
    PipelineConfig::new().with_rate_limiter(None)
}

pub type Completion<T> = oneshot::Receiver<Result<T, PipelineError>>;

pub fn submit_image(pipeline: &ImagePipeline, request: ImageRequest) -> (ImageTask, Completion<ImageResponse>) {
    let (tx, rx) = oneshot::channel();
    let task = pipeline.submit_image(
        request,
        TaskCallbacks::new(move |result: Result<ImageResponse, PipelineError>| {
            let _ = tx.send(result);
        }),
    );
    (task, rx)
}

pub fn submit_data(pipeline: &ImagePipeline, request: ImageRequest) -> (ImageTask, Completion<DataResponse>) {
    let (tx, rx) = oneshot::channel();
    let task = pipeline.submit_data(
        request,
        TaskCallbacks::new(move |result: Result<DataResponse, PipelineError>| {
            let _ = tx.send(result);
        }),
    );
    (task, rx)
}

/// Image submission that also forwards every update.
pub fn submit_image_with_updates(
    pipeline: &ImagePipeline,
    request: ImageRequest,
) -> (ImageTask, Completion<ImageResponse>, mpsc::UnboundedReceiver<TaskUpdate>) {
    let (tx, rx) = oneshot::channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let task = pipeline.submit_image(
        request,
        TaskCallbacks::new(move |result: Result<ImageResponse, PipelineError>| {
            let _ = tx.send(result);
        })
        .with_updates(move |update: TaskUpdate| {
            let _ = updates_tx.send(update);
        }),
    );
    (task, rx, updates_rx)
}

pub async fn result<T>(completion: Completion<T>) -> Result<T, PipelineError> {
    within(completion).await.expect("completion callback dropped")
}
