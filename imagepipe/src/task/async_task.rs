//! The coalescible unit of shared work.
//!
//! An [`AsyncTask`] is a pure state machine. It owns the subscriber list,
//! the effective priority and the cached terminal event, and reports what
//! the caller has to do (start the work, propagate a priority, dispose the
//! work, deliver an event to a set of subscribers). It never performs I/O
//! and never calls back into its subscribers itself, which keeps all
//! mutation on the pipeline's serialized context.
//!
//! # State machine
//!
//! ```text
//!            first subscribe
//!   Idle ─────────────────────► Started ──┬── emit(Completed) ──► Completed
//!                                         ├── emit(Failed) ─────► Failed
//!                                         └── last unsubscribe ─► Cancelled
//! ```
//!
//! Terminal states are absorbing: later events are ignored and new
//! subscribers receive the cached terminal event immediately.

use crate::error::PipelineError;
use crate::image::Progress;
use crate::request::Priority;

/// Identifies one subscription on one task.
pub type SubscriptionId = u64;

/// Event delivered to subscribers in production order.
#[derive(Debug, Clone)]
pub enum Event<V> {
    Progress(Progress),
    /// Intermediate value. Never delivered after the terminal event.
    Preview(V),
    Completed(V),
    Failed(PipelineError),
}

impl<V> Event<V> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Completed(_) | Event::Failed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Progress(_) => "progress",
            Event::Preview(_) => "preview",
            Event::Completed(_) => "completed",
            Event::Failed(_) => "failed",
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone)]
pub enum TaskState<V> {
    Idle,
    Started,
    Completed(V),
    Failed(PipelineError),
    Cancelled,
}

impl<V> TaskState<V> {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed(_) | TaskState::Failed(_) | TaskState::Cancelled
        )
    }
}

/// Result of [`AsyncTask::subscribe`].
#[derive(Debug)]
pub enum Subscribe<V> {
    /// The task is terminal; the cached event must be delivered to the
    /// caller right away and nothing was retained.
    Replayed(Event<V>),
    /// The subscriber was registered.
    Attached {
        id: SubscriptionId,
        /// The caller must start the underlying work
        start: bool,
        /// New effective priority to propagate, if it changed
        priority_changed: Option<Priority>,
    },
}

/// Result of [`AsyncTask::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribe {
    NotFound,
    Removed { priority_changed: Option<Priority> },
    /// The last subscriber left before completion; the caller must cancel
    /// the underlying work.
    Disposed,
}

#[derive(Debug)]
struct Subscription<S> {
    id: SubscriptionId,
    priority: Priority,
    subscriber: S,
}

/// A unit of work shared by any number of subscribers of type `S`.
#[derive(Debug)]
pub struct AsyncTask<V, S> {
    state: TaskState<V>,
    subscriptions: Vec<Subscription<S>>,
    next_subscription: SubscriptionId,
    priority: Priority,
}

impl<V: Clone, S: Clone> AsyncTask<V, S> {
    pub fn new() -> Self {
        Self {
            state: TaskState::Idle,
            subscriptions: Vec::new(),
            next_subscription: 1,
            priority: Priority::VeryLow,
        }
    }

    pub fn state(&self) -> &TaskState<V> {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Maximum priority over the active subscriptions.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }

    pub fn subscribe(&mut self, priority: Priority, subscriber: S) -> Subscribe<V> {
        match &self.state {
            TaskState::Completed(value) => return Subscribe::Replayed(Event::Completed(value.clone())),
            TaskState::Failed(error) => return Subscribe::Replayed(Event::Failed(error.clone())),
            TaskState::Cancelled => return Subscribe::Replayed(Event::Failed(PipelineError::Cancelled)),
            TaskState::Idle | TaskState::Started => {}
        }

        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            priority,
            subscriber,
        });

        let start = matches!(self.state, TaskState::Idle);
        if start {
            self.state = TaskState::Started;
            self.priority = priority;
            return Subscribe::Attached {
                id,
                start,
                priority_changed: None,
            };
        }

        Subscribe::Attached {
            id,
            start,
            priority_changed: self.recompute_priority(),
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Unsubscribe {
        let Some(index) = self.subscriptions.iter().position(|s| s.id == id) else {
            return Unsubscribe::NotFound;
        };
        self.subscriptions.remove(index);

        if self.subscriptions.is_empty() && !self.state.is_terminal() {
            self.state = TaskState::Cancelled;
            return Unsubscribe::Disposed;
        }

        Unsubscribe::Removed {
            priority_changed: self.recompute_priority(),
        }
    }

    /// Updates one subscription's priority. Returns the new effective
    /// priority if it changed.
    pub fn set_priority(&mut self, id: SubscriptionId, priority: Priority) -> Option<Priority> {
        let subscription = self.subscriptions.iter_mut().find(|s| s.id == id)?;
        if subscription.priority == priority {
            return None;
        }
        subscription.priority = priority;
        self.recompute_priority()
    }

    /// Records an event produced by the underlying work and returns the
    /// subscribers it must be delivered to, in registration order.
    ///
    /// A terminal event is cached and clears the subscriber list. Events
    /// produced after the terminal event are dropped.
    pub fn emit(&mut self, event: &Event<V>) -> Vec<(SubscriptionId, S)> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        match event {
            Event::Completed(value) => self.state = TaskState::Completed(value.clone()),
            Event::Failed(error) => self.state = TaskState::Failed(error.clone()),
            Event::Progress(_) | Event::Preview(_) => {
                return self
                    .subscriptions
                    .iter()
                    .map(|s| (s.id, s.subscriber.clone()))
                    .collect();
            }
        }

        self.subscriptions
            .drain(..)
            .map(|s| (s.id, s.subscriber))
            .collect()
    }

    fn recompute_priority(&mut self) -> Option<Priority> {
        let max = self.subscriptions.iter().map(|s| s.priority).max()?;
        if max == self.priority {
            return None;
        }
        self.priority = max;
        Some(max)
    }
}

impl<V: Clone, S: Clone> Default for AsyncTask<V, S> {
    fn default() -> Self {
        Self::new()
    }
}
