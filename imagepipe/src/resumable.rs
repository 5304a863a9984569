//! Partial downloads kept for range resumption.
//!
//! When a fetch is cancelled or fails after some bytes arrived, and the
//! server advertised byte ranges plus a validator, the bytes are parked
//! here. The next fetch of the same URL by the same pipeline takes them
//! back and asks the transport to continue from the stored offset.
//!
//! The registry is an explicit object shared by any number of pipelines.
//! Each pipeline registers on start and unregisters on teardown, which
//! drops its entries.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default cap on the number of parked downloads.
pub const DEFAULT_RESUMABLE_ENTRIES: usize = 32;

/// Default cap on the total parked bytes.
pub const DEFAULT_RESUMABLE_BYTES: usize = 32 * 1024 * 1024;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub fn next() -> Self {
        Self(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

/// Bytes received before an interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableData {
    pub data: Bytes,
    /// ETag or Last-Modified of the interrupted response
    pub validator: String,
}

type EntryKey = (PipelineId, String);

#[derive(Default)]
struct Inner {
    pipelines: HashSet<PipelineId>,
    entries: HashMap<EntryKey, ResumableData>,
    order: VecDeque<EntryKey>,
    total_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &EntryKey) -> Option<ResumableData> {
        let data = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        self.total_bytes -= data.data.len();
        Some(data)
    }

    fn evict_front(&mut self) -> bool {
        match self.order.pop_front() {
            Some(key) => {
                if let Some(data) = self.entries.remove(&key) {
                    self.total_bytes -= data.data.len();
                }
                true
            }
            None => false,
        }
    }
}

/// Shared table of parked partial downloads, evicted first-in first-out.
pub struct ResumableDataRegistry {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
}

impl ResumableDataRegistry {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
            max_bytes,
        }
    }

    pub fn register(&self, pipeline: PipelineId) {
        self.inner.lock().pipelines.insert(pipeline);
    }

    /// Forgets the pipeline and every entry it stored.
    pub fn unregister(&self, pipeline: PipelineId) {
        let mut inner = self.inner.lock();
        inner.pipelines.remove(&pipeline);

        let stale: Vec<EntryKey> = inner
            .order
            .iter()
            .filter(|(owner, _)| *owner == pipeline)
            .cloned()
            .collect();
        for key in &stale {
            inner.remove(key);
        }
    }

    pub fn is_registered(&self, pipeline: PipelineId) -> bool {
        self.inner.lock().pipelines.contains(&pipeline)
    }

    /// Parks data for `url`. Ignored for unregistered pipelines and for
    /// payloads larger than the whole budget.
    pub fn store(&self, pipeline: PipelineId, url: &str, data: ResumableData) {
        if data.data.is_empty() || data.data.len() > self.max_bytes || self.max_entries == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if !inner.pipelines.contains(&pipeline) {
            return;
        }

        let key = (pipeline, url.to_string());
        inner.remove(&key);
        while inner.entries.len() >= self.max_entries
            || inner.total_bytes + data.data.len() > self.max_bytes
        {
            if !inner.evict_front() {
                break;
            }
        }

        debug!(pipeline = %pipeline, url, bytes = data.data.len(), "Stored resumable data");
        inner.total_bytes += data.data.len();
        inner.order.push_back(key.clone());
        inner.entries.insert(key, data);
    }

    /// Removes and returns the parked data for `url`.
    pub fn take(&self, pipeline: PipelineId, url: &str) -> Option<ResumableData> {
        self.inner.lock().remove(&(pipeline, url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

impl Default for ResumableDataRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RESUMABLE_ENTRIES, DEFAULT_RESUMABLE_BYTES)
    }
}
