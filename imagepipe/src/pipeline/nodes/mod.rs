//! Task graph nodes.
//!
//! Each node is the stage-specific half of a task: the shared half is the
//! [`AsyncTask`](crate::task::AsyncTask) the daemon keeps next to it. Nodes
//! run on the daemon's serialized context and never touch shared state.
//! They answer three questions, each by returning a list of
//! [`NodeAction`]s:
//!
//! - what to do when the first subscriber arrives (`start`)
//! - what to do with an event from the dependency (`on_dependency_event`)
//! - what to do with the result of off-context work (`on_signal`)
//!
//! ```text
//!   LoadImage ──► ProcessImage ──► FetchDecodedImage ──► FetchOriginalData ──► Transport
//!       │            (only with processors)                      ▲
//!       └──────────────► FetchDecodedImage                       │
//!   LoadData ────────────────────────────────────────────────────┘
//! ```
//!
//! Dependencies are named by key, never by reference: a node asks the
//! daemon to subscribe it to the publisher of a key and the daemon resolves
//! the key through the task pool, coalescing with any live task.

mod decode;
mod fetch_data;
mod load_data;
mod load_image;
mod process;

pub(crate) use decode::FetchDecodedImage;
pub(crate) use fetch_data::FetchOriginalData;
pub(crate) use load_data::LoadData;
pub(crate) use load_image::LoadImage;
pub(crate) use process::ProcessImage;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::image::{DataResponse, ImageResponse};
use crate::keys::TaskKey;
use crate::rate_limiter::RateLimiter;
use crate::request::Priority;
use crate::resumable::{PipelineId, ResumableDataRegistry};
use crate::task::{Event, TaskId};
use crate::traits::{DataCache, Decoder, ImageCache, Transport};
use crate::worker::WorkerPool;
use image::DynamicImage;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Values and messages
// =============================================================================

/// Value carried by task events. Data stages produce `Data`, image stages
/// produce `Image`.
#[derive(Debug, Clone)]
pub(crate) enum Output {
    Data(DataResponse),
    Image(ImageResponse),
}

impl Output {
    pub(crate) fn into_image(self) -> Result<ImageResponse, PipelineError> {
        match self {
            Output::Image(response) => Ok(response),
            Output::Data(_) => Err(unexpected_output("image")),
        }
    }

    pub(crate) fn into_data(self) -> Result<DataResponse, PipelineError> {
        match self {
            Output::Data(response) => Ok(response),
            Output::Image(_) => Err(unexpected_output("data")),
        }
    }
}

pub(crate) fn unexpected_output(expected: &str) -> PipelineError {
    PipelineError::Internal(format!("stage produced a value that is not {}", expected))
}

/// Result of off-context work, reported back to the owning node.
#[derive(Debug)]
pub(crate) enum Signal {
    /// An event for the node's own subscribers
    Emit(Event<Output>),
    Decoded {
        result: Result<DynamicImage, PipelineError>,
        is_final: bool,
    },
    Processed {
        result: Result<ImageResponse, PipelineError>,
        is_final: bool,
    },
}

/// A signal addressed to a task.
#[derive(Debug)]
pub(crate) struct NodeMessage {
    pub task: TaskId,
    pub signal: Signal,
}

/// Sends signals for one task into the daemon.
#[derive(Clone)]
pub(crate) struct SignalSender {
    task: TaskId,
    messages: mpsc::UnboundedSender<NodeMessage>,
}

impl SignalSender {
    pub(crate) fn send(&self, signal: Signal) {
        // The daemon is gone when this fails; nothing is waiting for the result.
        let _ = self.messages.send(NodeMessage {
            task: self.task,
            signal,
        });
    }

    pub(crate) fn emit(&self, event: Event<Output>) {
        self.send(Signal::Emit(event));
    }
}

/// What a node asks the daemon to do.
pub(crate) enum NodeAction {
    Emit(Event<Output>),
    Subscribe(Dependency),
}

/// A dependency named by key, plus the node to build if no live task
/// exists for that key.
pub(crate) struct Dependency {
    pub key: TaskKey,
    pub node: Node,
}

// =============================================================================
// Environment
// =============================================================================

/// Collaborators and limits shared by every node of one pipeline.
pub(crate) struct StageEnv {
    pub pipeline_id: PipelineId,
    pub config: PipelineConfig,
    pub transport: Arc<dyn Transport>,
    pub decoder: Arc<dyn Decoder>,
    pub image_cache: Option<Arc<dyn ImageCache>>,
    pub data_cache: Option<Arc<dyn DataCache>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub resumable: Option<Arc<ResumableDataRegistry>>,
    pub decoding: WorkerPool,
    pub processing: WorkerPool,
    pub cache_io: WorkerPool,
    pub messages: mpsc::UnboundedSender<NodeMessage>,
}

/// Per-call view of a task for its node.
pub(crate) struct StageContext<'a> {
    pub id: TaskId,
    pub token: &'a CancellationToken,
    pub priority: &'a watch::Sender<Priority>,
    pub env: &'a StageEnv,
}

impl StageContext<'_> {
    pub(crate) fn signals(&self) -> SignalSender {
        SignalSender {
            task: self.id,
            messages: self.env.messages.clone(),
        }
    }

    /// Runs `work` off the serialized context and reports its signal.
    /// Nothing is reported if the task is disposed first.
    pub(crate) fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Option<Signal>> + Send + 'static,
    {
        let signals = self.signals();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                signal = work => {
                    if let Some(signal) = signal {
                        signals.send(signal);
                    }
                }
            }
        });
    }
}

// =============================================================================
// Stage trait and node enum
// =============================================================================

/// Stage-specific behaviour of a task.
pub(crate) trait Stage {
    /// Called once, when the first subscriber attaches.
    fn start(&mut self, cx: &StageContext<'_>) -> Vec<NodeAction>;

    fn on_dependency_event(&mut self, _event: Event<Output>, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        Vec::new()
    }

    fn on_signal(&mut self, _signal: Signal, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        Vec::new()
    }
}

pub(crate) enum Node {
    FetchOriginalData(FetchOriginalData),
    FetchDecodedImage(FetchDecodedImage),
    ProcessImage(ProcessImage),
    LoadImage(LoadImage),
    LoadData(LoadData),
}

impl Node {
    fn stage(&mut self) -> &mut dyn Stage {
        match self {
            Node::FetchOriginalData(node) => node,
            Node::FetchDecodedImage(node) => node,
            Node::ProcessImage(node) => node,
            Node::LoadImage(node) => node,
            Node::LoadData(node) => node,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Node::FetchOriginalData(_) => "fetch_original_data",
            Node::FetchDecodedImage(_) => "fetch_decoded_image",
            Node::ProcessImage(_) => "process_image",
            Node::LoadImage(_) => "load_image",
            Node::LoadData(_) => "load_data",
        }
    }

    pub(crate) fn start(&mut self, cx: &StageContext<'_>) -> Vec<NodeAction> {
        self.stage().start(cx)
    }

    pub(crate) fn on_dependency_event(&mut self, event: Event<Output>, cx: &StageContext<'_>) -> Vec<NodeAction> {
        self.stage().on_dependency_event(event, cx)
    }

    pub(crate) fn on_signal(&mut self, signal: Signal, cx: &StageContext<'_>) -> Vec<NodeAction> {
        self.stage().on_signal(signal, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageContainer;
    use bytes::Bytes;

    #[test]
    fn test_output_conversions() {
        let data = Output::Data(DataResponse {
            data: Bytes::from_static(b"x"),
            response: None,
            cache_type: None,
        });
        assert!(data.clone().into_data().is_ok());
        assert!(matches!(data.into_image(), Err(PipelineError::Internal(_))));

        let image = Output::Image(ImageResponse {
            container: ImageContainer::new(DynamicImage::new_rgba8(1, 1)),
            cache_type: None,
            response: None,
        });
        assert!(image.clone().into_image().is_ok());
        assert!(image.into_data().is_err());
    }
}
