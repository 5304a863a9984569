//! Original data stage: disk cache, rate limiter, transport.

use super::{NodeAction, Output, SignalSender, Stage, StageContext};
use crate::error::{PipelineError, TransportError};
use crate::image::{CacheType, DataResponse, Progress, ResponseInfo};
use crate::rate_limiter::RateLimiter;
use crate::request::{ImageRequest, Priority, RequestOptions};
use crate::resumable::{PipelineId, ResumableData, ResumableDataRegistry};
use crate::task::Event;
use crate::traits::{DataCache, ResumeFrom, Transport, TransportEvent, TransportRequest};
use crate::worker::{ExecutorError, WorkerPool};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct FetchOriginalData {
    request: ImageRequest,
}

impl FetchOriginalData {
    pub(crate) fn new(request: ImageRequest) -> Self {
        Self { request }
    }
}

impl Stage for FetchOriginalData {
    fn start(&mut self, cx: &StageContext<'_>) -> Vec<NodeAction> {
        let env = cx.env;
        let resumable = if env.config.resumable_data() {
            env.resumable.clone()
        } else {
            None
        };

        let job = FetchJob {
            url: self.request.url().to_string(),
            options: self.request.options(),
            progressive: env.config.progressive_decoding(),
            transport: Arc::clone(&env.transport),
            data_cache: env.data_cache.clone(),
            rate_limiter: env.rate_limiter.clone(),
            cache_io: env.cache_io.clone(),
            resumable,
            pipeline_id: env.pipeline_id,
            token: cx.token.clone(),
            priority: cx.priority.subscribe(),
            signals: cx.signals(),
        };
        tokio::spawn(job.run());
        Vec::new()
    }
}

/// One fetch of the original bytes, from cache lookup to the last chunk.
struct FetchJob {
    url: String,
    options: RequestOptions,
    progressive: bool,
    transport: Arc<dyn Transport>,
    data_cache: Option<Arc<dyn DataCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    cache_io: WorkerPool,
    resumable: Option<Arc<ResumableDataRegistry>>,
    pipeline_id: PipelineId,
    token: CancellationToken,
    priority: watch::Receiver<Priority>,
    signals: SignalSender,
}

impl FetchJob {
    async fn run(self) {
        if self.options.disk_cache_reads {
            if let Some(cache) = self.data_cache.clone() {
                let key = self.url.clone();
                match self
                    .cache_io
                    .run(&self.token, self.priority.clone(), move || cache.get(&key))
                    .await
                {
                    Ok(Some(data)) => {
                        debug!(url = %self.url, bytes = data.len(), "Disk cache hit");
                        self.signals.emit(Event::Completed(Output::Data(DataResponse {
                            data,
                            response: None,
                            cache_type: Some(CacheType::Disk),
                        })));
                        return;
                    }
                    Ok(None) => {}
                    Err(ExecutorError::Cancelled) => return,
                    Err(e) => warn!(url = %self.url, error = %e, "Disk cache lookup failed"),
                }
            }
        }

        if self.options.return_cache_data_dont_load {
            self.signals
                .emit(Event::Failed(PipelineError::DataMissingInCache));
            return;
        }

        if let Some(limiter) = &self.rate_limiter {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = limiter.acquire() => {}
            }
        }

        let resumed = self
            .resumable
            .as_ref()
            .and_then(|registry| registry.take(self.pipeline_id, &self.url));
        let request = TransportRequest {
            url: self.url.clone(),
            priority: self.priority.clone(),
            resume: resumed.as_ref().map(|r| ResumeFrom {
                offset: r.data.len() as u64,
                validator: r.validator.clone(),
            }),
        };
        if let Some(resume) = &request.resume {
            debug!(url = %self.url, offset = resume.offset, "Resuming download");
        }

        let mut stream = self.transport.fetch(request);
        let mut download = Download::new(resumed);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                item = stream.next() => Some(item),
            };
            let Some(item) = next else {
                drop(stream);
                self.park(&download);
                return;
            };

            match item {
                Some(Ok(TransportEvent::Response(info))) => download.on_response(info),
                Some(Ok(TransportEvent::Chunk(chunk))) => {
                    download.append(&chunk);
                    self.signals.emit(Event::Progress(download.progress()));
                    if self.progressive {
                        if let Some(data) = download.preview() {
                            self.signals.emit(Event::Preview(Output::Data(DataResponse {
                                data,
                                response: download.response.clone(),
                                cache_type: None,
                            })));
                        }
                    }
                }
                Some(Err(e)) => {
                    self.park(&download);
                    debug!(url = %self.url, error = %e, "Transport failed");
                    self.signals.emit(Event::Failed(e.into()));
                    return;
                }
                None => break,
            }
        }
        drop(stream);

        if download.buffer.is_empty() {
            self.signals
                .emit(Event::Failed(TransportError::EmptyResponse.into()));
            return;
        }

        let data = download.buffer.freeze();
        if self.options.disk_cache_writes {
            self.store(data.clone());
        }

        self.signals.emit(Event::Completed(Output::Data(DataResponse {
            data,
            response: download.response,
            cache_type: None,
        })));
    }

    /// Writes the bytes to the disk cache without holding up completion.
    fn store(&self, data: Bytes) {
        let Some(cache) = self.data_cache.clone() else {
            return;
        };
        let pool = self.cache_io.clone();
        let key = self.url.clone();
        let priority = self.priority.clone();

        // The task's own token is cancelled as soon as it completes.
        tokio::spawn(async move {
            let token = CancellationToken::new();
            if let Err(e) = pool.run(&token, priority, move || cache.store(&key, data)).await {
                warn!(error = %e, "Disk cache write did not run");
            }
        });
    }

    /// Parks a partial download for a later range request.
    fn park(&self, download: &Download) {
        let Some(registry) = &self.resumable else {
            return;
        };
        let Some(response) = &download.response else {
            return;
        };
        let Some(validator) = response.validator() else {
            return;
        };
        if !response.accepts_ranges || download.buffer.is_empty() {
            return;
        }

        registry.store(
            self.pipeline_id,
            &self.url,
            ResumableData {
                data: Bytes::copy_from_slice(&download.buffer),
                validator: validator.to_string(),
            },
        );
    }
}

/// A preview is cut once the buffer has grown by this fraction since the
/// previous one, keeping the total bytes copied for previews linear in the
/// download size.
const PREVIEW_GROWTH_DIVISOR: usize = 4;

/// Accumulated bytes of one transport stream.
struct Download {
    buffer: BytesMut,
    response: Option<ResponseInfo>,
    resumed: Option<ResumableData>,
    total: u64,
    previewed: usize,
}

impl Download {
    fn new(resumed: Option<ResumableData>) -> Self {
        Self {
            buffer: BytesMut::new(),
            response: None,
            resumed,
            total: 0,
            previewed: 0,
        }
    }

    /// Snapshot of the buffer for a progressive decode, if it grew enough
    /// since the last one.
    fn preview(&mut self) -> Option<Bytes> {
        let len = self.buffer.len();
        let due = self.previewed + self.previewed / PREVIEW_GROWTH_DIVISOR;
        if len == 0 || len <= self.previewed || len < due {
            return None;
        }
        self.previewed = len;
        Some(Bytes::copy_from_slice(&self.buffer))
    }

    fn on_response(&mut self, info: ResponseInfo) {
        // A full response replaces any parked prefix.
        if let Some(resumed) = self.resumed.take() {
            if info.is_partial_content() {
                self.buffer.extend_from_slice(&resumed.data);
            }
        }
        self.total = info
            .expected_content_length
            .map(|remaining| remaining + self.buffer.len() as u64)
            .unwrap_or(0);
        self.response = Some(info);
    }

    fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn progress(&self) -> Progress {
        Progress::new(self.buffer.len() as u64, self.total)
    }
}
