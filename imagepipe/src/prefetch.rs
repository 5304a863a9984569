//! Cache warming.
//!
//! [`ImagePrefetcher`] loads requests ahead of time at low priority so a
//! later load is answered from cache. Prefetches go through the regular
//! pipeline and therefore coalesce with any real load of the same
//! resource.
//!
//! # Example
//!
//! ```ignore
//! let prefetcher = ImagePrefetcher::new(pipeline.clone(), PrefetchDestination::MemoryCache);
//! prefetcher.start_prefetching(urls.iter().map(|u| ImageRequest::new(u.as_str())));
//!
//! // User scrolled away
//! prefetcher.stop_prefetching(urls.iter().map(|u| ImageRequest::new(u.as_str())));
//! ```

use crate::callback::CallbackQueue;
use crate::error::PipelineError;
use crate::image::{DataResponse, ImageResponse};
use crate::keys::{DataKey, LoadImageKey, TaskKey};
use crate::pipeline::{ImagePipeline, ImageTask, ImageTaskId, TaskCallbacks};
use crate::request::{ImageRequest, Priority};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Where prefetched results end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefetchDestination {
    /// Full image load; the decoded result lands in the memory cache
    #[default]
    MemoryCache,
    /// Data load only; the original bytes land in the disk cache
    DiskCache,
}

type Active = Mutex<HashMap<TaskKey, ImageTask>>;

/// Starts and stops background loads, deduplicated by load key.
///
/// Dropping the prefetcher cancels every prefetch still running.
pub struct ImagePrefetcher {
    pipeline: ImagePipeline,
    destination: PrefetchDestination,
    priority: Priority,
    active: Arc<Active>,
}

impl ImagePrefetcher {
    pub fn new(pipeline: ImagePipeline, destination: PrefetchDestination) -> Self {
        Self {
            pipeline,
            destination,
            priority: Priority::Low,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Priority used for new prefetches. Defaults to `Priority::Low`.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn destination(&self) -> PrefetchDestination {
        self.destination
    }

    fn key(&self, request: &ImageRequest) -> TaskKey {
        match self.destination {
            PrefetchDestination::MemoryCache => TaskKey::LoadImage(LoadImageKey::for_request(request)),
            PrefetchDestination::DiskCache => TaskKey::LoadData(DataKey::for_request(request)),
        }
    }

    /// Starts prefetching each request not already being prefetched.
    pub fn start_prefetching(&self, requests: impl IntoIterator<Item = ImageRequest>) {
        for request in requests {
            let request = request.with_priority(self.priority);
            let key = self.key(&request);
            if self.active.lock().contains_key(&key) {
                continue;
            }

            let url = request.url().to_string();
            let task = self.submit(request, key.clone());
            trace!(url = %url, task = %task.id(), "Prefetch started");

            let mut active = self.active.lock();
            if task.status().is_terminal() {
                // Finished before it could be recorded.
                continue;
            }
            active.insert(key, task);
        }
    }

    fn submit(&self, request: ImageRequest, key: TaskKey) -> ImageTask {
        let done = Finished {
            active: Arc::downgrade(&self.active),
            key,
        };

        match self.destination {
            PrefetchDestination::MemoryCache => {
                let callbacks =
                    TaskCallbacks::new(move |result: Result<ImageResponse, PipelineError>| done.finish(result.err()))
                        .on_queue(CallbackQueue::Inline);
                self.pipeline.submit_image(request, callbacks)
            }
            PrefetchDestination::DiskCache => {
                let callbacks =
                    TaskCallbacks::new(move |result: Result<DataResponse, PipelineError>| done.finish(result.err()))
                        .on_queue(CallbackQueue::Inline);
                self.pipeline.submit_data(request, callbacks)
            }
        }
    }

    /// Cancels the prefetches matching `requests`.
    pub fn stop_prefetching(&self, requests: impl IntoIterator<Item = ImageRequest>) {
        let stopped: Vec<ImageTask> = {
            let mut active = self.active.lock();
            requests
                .into_iter()
                .filter_map(|request| active.remove(&self.key(&request)))
                .collect()
        };
        for task in stopped {
            task.cancel();
        }
    }

    /// Cancels every running prefetch.
    pub fn stop_all(&self) {
        let stopped: Vec<ImageTask> = self.active.lock().drain().map(|(_, task)| task).collect();
        if !stopped.is_empty() {
            debug!(count = stopped.len(), "Stopping all prefetches");
        }
        for task in stopped {
            task.cancel();
        }
    }

    /// Number of prefetches still running.
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle ids of the running prefetches.
    pub fn task_ids(&self) -> Vec<ImageTaskId> {
        self.active.lock().values().map(|t| t.id()).collect()
    }
}

impl Drop for ImagePrefetcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Completion hook removing a finished prefetch from the active set.
struct Finished {
    active: Weak<Active>,
    key: TaskKey,
}

impl Finished {
    fn finish(self, error: Option<PipelineError>) {
        if let Some(error) = error {
            if !error.is_cancelled() {
                debug!(key = ?self.key, error = %error, "Prefetch failed");
            }
        }
        let Some(active) = self.active.upgrade() else {
            return;
        };
        let mut active = active.lock();
        // A newer prefetch of the same key may have replaced this one.
        if active.get(&self.key).is_some_and(|task| task.status().is_terminal()) {
            active.remove(&self.key);
        }
    }
}
