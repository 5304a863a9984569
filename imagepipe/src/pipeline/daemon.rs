//! The pipeline's serialized context.
//!
//! [`PipelineDaemon`] is an actor task that owns the task pool and the
//! handle map. Public API calls arrive as [`Command`]s; results of
//! off-context work (transport chunks, decodes, processing) arrive as
//! [`NodeMessage`]s. Both are handled one at a time, so every mutation of a
//! task's subscriber list, priority or state is linearized.
//!
//! ```text
//!   ImagePipeline ──Command──►┐
//!                             ├─► PipelineDaemon ──► TaskPool<TaskKey, TaskEntry>
//!   spawned work ──Signal────►┘         │
//!                                       └──► handles: ImageTaskId → HandleRecord
//! ```
//!
//! A task lives in the pool while it has subscribers and no terminal event.
//! The terminal event evicts it before being delivered, and the last
//! subscriber leaving disposes it, cancelling its token and releasing its
//! own dependency.

use super::callbacks::{Delivery, TaskUpdate};
use super::handle::{ImageTask, ImageTaskId, TaskKind};
use super::nodes::{LoadData, LoadImage, Node, NodeAction, NodeMessage, Output, Signal, StageContext, StageEnv};
use super::PipelineStats;
use crate::error::PipelineError;
use crate::keys::{DataKey, LoadImageKey, TaskKey};
use crate::request::Priority;
use crate::task::{AsyncTask, Event, Subscribe, SubscriptionId, TaskId, TaskPool, Unsubscribe};
use crate::telemetry::{LifecycleEvent, LifecycleObserver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Requests from the public API.
pub(crate) enum Command {
    Submit { handle: ImageTask, delivery: Delivery },
    Cancel { id: ImageTaskId },
    UpdatePriority { id: ImageTaskId, priority: Priority },
    Invalidate,
    Stats { reply: oneshot::Sender<PipelineStats> },
}

/// Who a task delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscriber {
    Node(TaskId),
    Handle(ImageTaskId),
}

/// One subscription on one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    task: TaskId,
    subscription: SubscriptionId,
}

struct TaskEntry {
    task: AsyncTask<Output, Subscriber>,
    node: Node,
    token: CancellationToken,
    priority: watch::Sender<Priority>,
    /// This task's own subscription on its dependency
    dependency: Option<Link>,
}

impl TaskEntry {
    fn new(node: Node, token: CancellationToken) -> Self {
        let (priority, _) = watch::channel(Priority::default());
        Self {
            task: AsyncTask::new(),
            node,
            token,
            priority,
            dependency: None,
        }
    }
}

struct HandleRecord {
    handle: ImageTask,
    delivery: Delivery,
    link: Option<Link>,
}

/// Actor owning all orchestration state of one pipeline.
pub(crate) struct PipelineDaemon {
    pool: TaskPool<TaskKey, TaskEntry>,
    handles: HashMap<ImageTaskId, HandleRecord>,
    env: StageEnv,
    observer: Arc<dyn LifecycleObserver>,
    commands: mpsc::UnboundedReceiver<Command>,
    messages: mpsc::UnboundedReceiver<NodeMessage>,
    root: CancellationToken,
    invalidated: bool,
}

impl PipelineDaemon {
    pub(crate) fn new(
        env: StageEnv,
        observer: Arc<dyn LifecycleObserver>,
        commands: mpsc::UnboundedReceiver<Command>,
        messages: mpsc::UnboundedReceiver<NodeMessage>,
    ) -> Self {
        Self {
            pool: TaskPool::new(env.config.coalescing()),
            handles: HashMap::new(),
            env,
            observer,
            commands,
            messages,
            root: CancellationToken::new(),
            invalidated: false,
        }
    }

    /// Runs until every [`ImagePipeline`](super::ImagePipeline) clone is
    /// dropped. Handles still tracked at that point are cancelled.
    pub(crate) async fn run(mut self) {
        let pipeline = self.env.pipeline_id;
        if let Some(registry) = &self.env.resumable {
            registry.register(pipeline);
        }
        info!(pipeline = %pipeline, "Pipeline daemon started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = self.messages.recv() => self.handle_message(message),
            }
        }

        self.invalidate();
        self.root.cancel();
        if let Some(registry) = &self.env.resumable {
            registry.unregister(pipeline);
        }
        info!(pipeline = %pipeline, "Pipeline daemon stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { handle, delivery } => self.submit(handle, delivery),
            Command::Cancel { id } => self.cancel(id),
            Command::UpdatePriority { id, priority } => self.update_priority(id, priority),
            Command::Invalidate => self.invalidate(),
            Command::Stats { reply } => {
                let _ = reply.send(PipelineStats {
                    live_tasks: self.pool.len(),
                    tracked_handles: self.handles.len(),
                    coalescing: self.pool.stats(),
                    decoding: self.env.decoding.stats(),
                    processing: self.env.processing.stats(),
                    cache_io: self.env.cache_io.stats(),
                    invalidated: self.invalidated,
                });
            }
        }
    }

    fn submit(&mut self, handle: ImageTask, delivery: Delivery) {
        if self.invalidated {
            if handle.reject() {
                delivery.fail(PipelineError::PipelineInvalidated);
            } else {
                self.finish_cancelled(handle, delivery);
            }
            return;
        }
        if !handle.begin() {
            // Cancelled before it reached the daemon.
            self.finish_cancelled(handle, delivery);
            return;
        }

        let id = handle.id();
        let kind = handle.kind();
        let priority = handle.priority();
        let request = handle.request().clone();

        self.observer.on_event(&LifecycleEvent::Started {
            task_id: id,
            kind,
            priority,
        });
        self.handles.insert(
            id,
            HandleRecord {
                handle,
                delivery,
                link: None,
            },
        );

        let (key, node) = match kind {
            TaskKind::Image => (
                TaskKey::LoadImage(LoadImageKey::for_request(&request)),
                Node::LoadImage(LoadImage::new(request)),
            ),
            TaskKind::Data => (
                TaskKey::LoadData(DataKey::for_request(&request)),
                Node::LoadData(LoadData::new(request)),
            ),
        };

        let Some(link) = self.subscribe(key, node, priority, Subscriber::Handle(id)) else {
            return;
        };
        if !self.is_live(link) {
            return;
        }
        match self.handles.get_mut(&id) {
            Some(record) => record.link = Some(link),
            None => self.unsubscribe(link),
        }
    }

    fn cancel(&mut self, id: ImageTaskId) {
        let Some(record) = self.handles.remove(&id) else {
            return;
        };
        debug!(task = %id, "Cancelling handle");
        if let Some(link) = record.link {
            self.unsubscribe(link);
        }
        self.finish_cancelled(record.handle, record.delivery);
    }

    fn update_priority(&mut self, id: ImageTaskId, priority: Priority) {
        let Some(record) = self.handles.get(&id) else {
            return;
        };
        let link = record.link;
        self.observer.on_event(&LifecycleEvent::PriorityUpdated {
            task_id: id,
            priority,
        });

        let Some(link) = link else {
            return;
        };
        let changed = self
            .pool
            .get_mut(link.task)
            .and_then(|entry| entry.task.set_priority(link.subscription, priority));
        if let Some(effective) = changed {
            self.propagate_priority(link.task, effective);
        }
    }

    fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        self.invalidated = true;
        info!(
            pipeline = %self.env.pipeline_id,
            tracked = self.handles.len(),
            "Invalidating pipeline"
        );

        let mut ids: Vec<ImageTaskId> = self.handles.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(record) = self.handles.remove(&id) {
                record.handle.mark_cancelled();
                if let Some(link) = record.link {
                    self.unsubscribe(link);
                }
                self.finish_cancelled(record.handle, record.delivery);
            }
        }
    }

    fn finish_cancelled(&self, handle: ImageTask, delivery: Delivery) {
        if let Some(on_cancel) = handle.take_cancel_handler() {
            delivery.queue().dispatch(on_cancel);
        }
        if handle.kind() == TaskKind::Image {
            self.observer
                .on_event(&LifecycleEvent::Cancelled { task_id: handle.id() });
        }
        delivery.fail(PipelineError::Cancelled);
    }

    // =========================================================================
    // Node messages
    // =========================================================================

    fn handle_message(&mut self, message: NodeMessage) {
        let NodeMessage { task, signal } = message;
        match signal {
            Signal::Emit(event) => self.emit(task, event),
            signal => {
                let actions = self.with_node(task, |node, cx| node.on_signal(signal, cx));
                self.apply(task, actions);
            }
        }
    }

    fn with_node<F>(&mut self, id: TaskId, f: F) -> Vec<NodeAction>
    where
        F: FnOnce(&mut Node, &StageContext<'_>) -> Vec<NodeAction>,
    {
        let Some(entry) = self.pool.get_mut(id) else {
            // Disposed or finished; late results are dropped.
            return Vec::new();
        };
        let cx = StageContext {
            id,
            token: &entry.token,
            priority: &entry.priority,
            env: &self.env,
        };
        f(&mut entry.node, &cx)
    }

    fn apply(&mut self, id: TaskId, actions: Vec<NodeAction>) {
        for action in actions {
            if !self.pool.contains(id) {
                return;
            }
            match action {
                NodeAction::Emit(event) => self.emit(id, event),
                NodeAction::Subscribe(dependency) => {
                    let Some(priority) = self.pool.get(id).map(|e| e.task.priority()) else {
                        return;
                    };
                    let Some(link) = self.subscribe(dependency.key, dependency.node, priority, Subscriber::Node(id))
                    else {
                        continue;
                    };
                    if !self.is_live(link) {
                        continue;
                    }
                    match self.pool.get_mut(id) {
                        Some(entry) => entry.dependency = Some(link),
                        None => self.unsubscribe(link),
                    }
                }
            }
        }
    }

    // =========================================================================
    // Task graph
    // =========================================================================

    /// Subscribes to the publisher of `key`, creating and starting it if
    /// needed. Returns `None` if the task was terminal and its event was
    /// replayed.
    fn subscribe(&mut self, key: TaskKey, node: Node, priority: Priority, subscriber: Subscriber) -> Option<Link> {
        let root = &self.root;
        let publisher = self
            .pool
            .publisher_for_key(key, || TaskEntry::new(node, root.child_token()));
        let entry = self.pool.get_mut(publisher.id)?;

        match entry.task.subscribe(priority, subscriber) {
            Subscribe::Replayed(event) => {
                self.deliver(subscriber, event, None);
                None
            }
            Subscribe::Attached {
                id: subscription,
                start,
                priority_changed,
            } => {
                let link = Link {
                    task: publisher.id,
                    subscription,
                };
                if start {
                    entry.priority.send_replace(priority);
                    trace!(task = %publisher.id, stage = entry.node.name(), priority = %priority, "Starting task");
                    let actions = self.with_node(publisher.id, |node, cx| node.start(cx));
                    self.apply(publisher.id, actions);
                } else if let Some(effective) = priority_changed {
                    self.propagate_priority(publisher.id, effective);
                }
                Some(link)
            }
        }
    }

    fn unsubscribe(&mut self, link: Link) {
        let Some(entry) = self.pool.get_mut(link.task) else {
            return;
        };
        match entry.task.unsubscribe(link.subscription) {
            Unsubscribe::NotFound => {}
            Unsubscribe::Removed { priority_changed } => {
                if let Some(effective) = priority_changed {
                    self.propagate_priority(link.task, effective);
                }
            }
            Unsubscribe::Disposed => self.dispose(link.task),
        }
    }

    /// Removes a task whose last subscriber left before completion.
    fn dispose(&mut self, id: TaskId) {
        let Some(entry) = self.pool.remove(id) else {
            return;
        };
        debug!(task = %id, stage = entry.node.name(), "Disposing task");
        entry.token.cancel();
        if let Some(link) = entry.dependency {
            self.unsubscribe(link);
        }
    }

    /// Pushes a new effective priority down the dependency chain.
    fn propagate_priority(&mut self, id: TaskId, priority: Priority) {
        let mut next = Some((id, priority));
        while let Some((task, priority)) = next.take() {
            let Some(entry) = self.pool.get_mut(task) else {
                return;
            };
            entry.priority.send_replace(priority);
            trace!(task = %task, stage = entry.node.name(), priority = %priority, "Priority changed");

            let Some(link) = entry.dependency else {
                return;
            };
            next = self
                .pool
                .get_mut(link.task)
                .and_then(|dependency| dependency.task.set_priority(link.subscription, priority))
                .map(|effective| (link.task, effective));
        }
    }

    fn emit(&mut self, id: TaskId, event: Event<Output>) {
        let Some(entry) = self.pool.get_mut(id) else {
            return;
        };
        let recipients = entry.task.emit(&event);
        let terminal = event.is_terminal();

        if terminal {
            trace!(task = %id, stage = entry.node.name(), event = event.kind(), "Task finished");
            let dependency = entry.dependency.take();
            if let Some(entry) = self.pool.remove(id) {
                entry.token.cancel();
            }
            if let Some(link) = dependency {
                self.unsubscribe(link);
            }
        }

        for (subscription, subscriber) in recipients {
            let link = Link { task: id, subscription };
            if !terminal && !self.is_live(link) {
                continue;
            }
            self.deliver(subscriber, event.clone(), Some(link));
        }
    }

    fn is_live(&self, link: Link) -> bool {
        self.pool
            .get(link.task)
            .is_some_and(|entry| entry.task.is_subscribed(link.subscription))
    }

    fn deliver(&mut self, subscriber: Subscriber, event: Event<Output>, source: Option<Link>) {
        match subscriber {
            Subscriber::Node(id) => {
                if event.is_terminal() {
                    if let Some(entry) = self.pool.get_mut(id) {
                        if source.is_some() && entry.dependency == source {
                            entry.dependency = None;
                        }
                    }
                }
                let actions = self.with_node(id, |node, cx| node.on_dependency_event(event, cx));
                self.apply(id, actions);
            }
            Subscriber::Handle(id) => self.deliver_to_handle(id, event),
        }
    }

    fn deliver_to_handle(&mut self, id: ImageTaskId, event: Event<Output>) {
        match event {
            Event::Progress(progress) => {
                let Some(record) = self.handles.get(&id) else {
                    return;
                };
                record.handle.record_progress(progress);
                self.observer
                    .on_event(&LifecycleEvent::Progress { task_id: id, progress });
                record.delivery.update(TaskUpdate::Progress(progress));
            }
            Event::Preview(Output::Image(preview)) => {
                if let Some(record) = self.handles.get(&id) {
                    record.delivery.update(TaskUpdate::Preview(preview));
                }
            }
            Event::Preview(Output::Data(_)) => {}
            Event::Completed(output) => self.finish_handle(id, Ok(output)),
            Event::Failed(error) => self.finish_handle(id, Err(error)),
        }
    }

    fn finish_handle(&mut self, id: ImageTaskId, result: Result<Output, PipelineError>) {
        let Some(record) = self.handles.remove(&id) else {
            return;
        };
        if !record.handle.finish() {
            // The caller cancelled while the result was in flight; the
            // queued cancel command will find no record.
            self.finish_cancelled(record.handle, record.delivery);
            return;
        }

        self.observer.on_event(&LifecycleEvent::Completed {
            task_id: id,
            kind: record.handle.kind(),
            success: result.is_ok(),
        });
        record.delivery.complete(result);
    }
}
