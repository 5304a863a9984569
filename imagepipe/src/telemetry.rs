//! Lifecycle events for caller handles.
//!
//! The pipeline reports what happens to each [`ImageTask`](crate::ImageTask)
//! through a [`LifecycleObserver`]. It doesn't know how events are
//! consumed: observers decide whether to log, count or display them.
//!
//! Observers are called on the pipeline's serialized context and must
//! return quickly.
//!
//! # Example
//!
//! ```
//! use imagepipe::telemetry::{LifecycleEvent, LifecycleObserver};
//!
//! struct CountCancellations(std::sync::atomic::AtomicUsize);
//!
//! impl LifecycleObserver for CountCancellations {
//!     fn on_event(&self, event: &LifecycleEvent) {
//!         if let LifecycleEvent::Cancelled { .. } = event {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//! }
//! ```

use crate::image::Progress;
use crate::pipeline::{ImageTaskId, TaskKind};
use crate::request::Priority;
use std::sync::Arc;

// =============================================================================
// Lifecycle Events
// =============================================================================

/// Events emitted for a caller handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The handle was attached to the task graph.
    Started {
        task_id: ImageTaskId,
        kind: TaskKind,
        priority: Priority,
    },

    /// Bytes arrived for the handle's source.
    Progress {
        task_id: ImageTaskId,
        progress: Progress,
    },

    /// The caller changed the handle's priority.
    PriorityUpdated {
        task_id: ImageTaskId,
        priority: Priority,
    },

    /// The handle was cancelled. Only reported for image tasks.
    Cancelled { task_id: ImageTaskId },

    /// The handle reached a result.
    Completed {
        task_id: ImageTaskId,
        kind: TaskKind,
        success: bool,
    },
}

impl LifecycleEvent {
    /// Returns the handle this event belongs to.
    pub fn task_id(&self) -> ImageTaskId {
        match self {
            Self::Started { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::PriorityUpdated { task_id, .. }
            | Self::Cancelled { task_id }
            | Self::Completed { task_id, .. } => *task_id,
        }
    }

    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::PriorityUpdated { .. } => "priority_updated",
            Self::Cancelled { .. } => "cancelled",
            Self::Completed { .. } => "completed",
        }
    }
}

// =============================================================================
// Observer Trait
// =============================================================================

/// Receives lifecycle events.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

// =============================================================================
// Built-in Observers
// =============================================================================

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl LifecycleObserver for NullObserver {
    fn on_event(&self, _event: &LifecycleEvent) {}
}

/// Logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Started {
                task_id,
                kind,
                priority,
            } => {
                tracing::debug!(task_id = %task_id, kind = %kind, priority = %priority, "Task started");
            }
            LifecycleEvent::Progress { task_id, progress } => {
                tracing::trace!(
                    task_id = %task_id,
                    completed = progress.completed,
                    total = progress.total,
                    "Task progress"
                );
            }
            LifecycleEvent::PriorityUpdated { task_id, priority } => {
                tracing::debug!(task_id = %task_id, priority = %priority, "Task priority updated");
            }
            LifecycleEvent::Cancelled { task_id } => {
                tracing::debug!(task_id = %task_id, "Task cancelled");
            }
            LifecycleEvent::Completed {
                task_id,
                kind,
                success,
            } => {
                tracing::debug!(task_id = %task_id, kind = %kind, success, "Task completed");
            }
        }
    }
}

/// Forwards events to several observers in order.
#[derive(Default)]
pub struct MultiplexObserver {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl MultiplexObserver {
    pub fn new(observers: Vec<Arc<dyn LifecycleObserver>>) -> Self {
        Self { observers }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }
}

impl LifecycleObserver for MultiplexObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for MultiplexObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexObserver")
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn started(id: u64) -> LifecycleEvent {
        LifecycleEvent::Started {
            task_id: ImageTaskId::from(id),
            kind: TaskKind::Image,
            priority: Priority::Normal,
        }
    }

    #[test]
    fn test_null_and_tracing_observers_accept_events() {
        NullObserver.on_event(&started(1));
        TracingObserver.on_event(&started(1));
        TracingObserver.on_event(&LifecycleEvent::Progress {
            task_id: ImageTaskId::from(1),
            progress: Progress::new(1, 2),
        });
    }

    #[test]
    fn test_event_task_id() {
        let event = LifecycleEvent::Cancelled {
            task_id: ImageTaskId::from(9),
        };
        assert_eq!(event.task_id(), ImageTaskId::from(9));
        assert_eq!(started(3).task_id(), ImageTaskId::from(3));
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(started(1).event_type(), "started");
        assert_eq!(
            LifecycleEvent::PriorityUpdated {
                task_id: ImageTaskId::from(1),
                priority: Priority::High,
            }
            .event_type(),
            "priority_updated"
        );
        assert_eq!(
            LifecycleEvent::Completed {
                task_id: ImageTaskId::from(1),
                kind: TaskKind::Data,
                success: false,
            }
            .event_type(),
            "completed"
        );
    }

    #[test]
    fn test_multiplex_observer() {
        struct Counting(AtomicUsize);

        impl LifecycleObserver for Counting {
            fn on_event(&self, _event: &LifecycleEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let a = Arc::new(Counting(AtomicUsize::new(0)));
        let b = Arc::new(Counting(AtomicUsize::new(0)));

        let mut multiplex = MultiplexObserver::new(vec![a.clone() as Arc<dyn LifecycleObserver>]);
        multiplex.add_observer(b.clone());
        multiplex.on_event(&started(1));
        multiplex.on_event(&started(2));

        assert_eq!(a.0.load(Ordering::Relaxed), 2);
        assert_eq!(b.0.load(Ordering::Relaxed), 2);
        assert!(format!("{:?}", multiplex).contains("observer_count: 2"));
    }
}
