//! Caller-facing task handles.
//!
//! An [`ImageTask`] is returned by every submission. It is a thin, cloneable
//! view of one caller's interest in a load: the daemon holds the only map
//! from handle id to subscription, and the handle only carries a weak
//! command sender to ask for cancellation or a priority change.
//!
//! # Lifecycle
//!
//! ```text
//!   Created ──► Running ──┬──► Completed
//!      │                  └──► Cancelled
//!      └────────────────────► Cancelled / Completed (rejected)
//! ```
//!
//! Cancellation is reachable from every non-terminal state. Once terminal,
//! further `cancel` and `set_priority` calls are no-ops.

use super::daemon::Command;
use crate::image::Progress;
use crate::request::{ImageRequest, Priority};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::trace;

/// Global counter for generating unique handle IDs.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a caller handle.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ImageTaskId(u64);

impl ImageTaskId {
    pub(crate) fn next() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ImageTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageTaskId({})", self.0)
    }
}

impl fmt::Display for ImageTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-task-{}", self.0)
    }
}

impl From<u64> for ImageTaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// What a handle loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Decoded (and possibly processed) image
    Image,
    /// Original bytes
    Data,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Image => write!(f, "image"),
            TaskKind::Data => write!(f, "data"),
        }
    }
}

/// Status of a caller handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Submitted, not yet attached to the task graph
    Created = 0,
    /// Attached and waiting for a result
    Running = 1,
    /// Cancelled by the caller or by invalidation
    Cancelled = 2,
    /// A result (success or failure) was delivered
    Completed = 3,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::Created,
            1 => TaskStatus::Running,
            2 => TaskStatus::Cancelled,
            _ => TaskStatus::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

type CancelHandler = Box<dyn FnOnce() + Send>;

struct Inner {
    id: ImageTaskId,
    kind: TaskKind,
    request: ImageRequest,
    status: AtomicU8,
    priority: Mutex<Priority>,
    progress: Mutex<Progress>,
    on_cancel: Mutex<Option<CancelHandler>>,
    commands: WeakUnboundedSender<Command>,
}

/// Handle to one submitted load.
///
/// Cloning shares the same handle.
#[derive(Clone)]
pub struct ImageTask {
    inner: Arc<Inner>,
}

impl ImageTask {
    pub(crate) fn new(kind: TaskKind, request: ImageRequest, commands: WeakUnboundedSender<Command>) -> Self {
        let priority = request.priority();
        Self {
            inner: Arc::new(Inner {
                id: ImageTaskId::next(),
                kind,
                request,
                status: AtomicU8::new(TaskStatus::Created as u8),
                priority: Mutex::new(priority),
                progress: Mutex::new(Progress::default()),
                on_cancel: Mutex::new(None),
                commands,
            }),
        }
    }

    pub fn id(&self) -> ImageTaskId {
        self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn request(&self) -> &ImageRequest {
        &self.inner.request
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    pub fn priority(&self) -> Priority {
        *self.inner.priority.lock()
    }

    /// Latest download progress. Never decreases.
    pub fn progress(&self) -> Progress {
        *self.inner.progress.lock()
    }

    /// Cancels the load. Idempotent.
    ///
    /// The completion callback receives `PipelineError::Cancelled` and the
    /// cancellation handler runs, both exactly once. Loads shared with other
    /// handles keep running for them.
    pub fn cancel(&self) {
        if !self.mark_cancelled() {
            return;
        }
        trace!(task = %self.id(), "Cancel requested");
        self.send(Command::Cancel { id: self.id() });
    }

    /// Changes this handle's priority. No-op once terminal or unchanged.
    pub fn set_priority(&self, priority: Priority) {
        if self.status().is_terminal() {
            return;
        }
        {
            let mut current = self.inner.priority.lock();
            if *current == priority {
                return;
            }
            *current = priority;
        }
        self.send(Command::UpdatePriority {
            id: self.id(),
            priority,
        });
    }

    /// Registers a handler run once when the handle is cancelled.
    ///
    /// Replaces any previous handler. Ignored once the handle is terminal.
    pub fn on_cancel(&self, handler: impl FnOnce() + Send + 'static) {
        if self.status().is_terminal() {
            return;
        }
        *self.inner.on_cancel.lock() = Some(Box::new(handler));
    }

    fn send(&self, command: Command) {
        // No daemon means every tracked handle was already finished.
        if let Some(commands) = self.inner.commands.upgrade() {
            let _ = commands.send(command);
        }
    }

    fn transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.inner
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Created → Running. Fails if the handle was cancelled first.
    pub(crate) fn begin(&self) -> bool {
        self.transition(TaskStatus::Created, TaskStatus::Running)
    }

    /// Running → Completed. Fails if the handle was cancelled first.
    pub(crate) fn finish(&self) -> bool {
        self.transition(TaskStatus::Running, TaskStatus::Completed)
    }

    /// Created → Completed, for submissions that never attach.
    pub(crate) fn reject(&self) -> bool {
        self.transition(TaskStatus::Created, TaskStatus::Completed)
    }

    /// Moves any non-terminal status to Cancelled. Returns false if the
    /// handle was already terminal.
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.transition(TaskStatus::Created, TaskStatus::Cancelled)
            || self.transition(TaskStatus::Running, TaskStatus::Cancelled)
    }

    pub(crate) fn record_progress(&self, progress: Progress) {
        let mut current = self.inner.progress.lock();
        if progress.completed >= current.completed {
            *current = progress;
        }
    }

    pub(crate) fn take_cancel_handler(&self) -> Option<CancelHandler> {
        self.inner.on_cancel.lock().take()
    }
}

impl fmt::Debug for ImageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTask")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("url", &self.request().url())
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}
