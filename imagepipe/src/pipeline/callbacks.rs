//! Caller callbacks and their delivery.

use super::nodes::Output;
use crate::callback::CallbackQueue;
use crate::error::PipelineError;
use crate::image::{DataResponse, ImageResponse, Progress};
use std::sync::Arc;

/// Non-terminal update for a handle.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    Progress(Progress),
    /// Progressive image. Only sent for image loads.
    Preview(ImageResponse),
}

type UpdateFn = Arc<dyn Fn(TaskUpdate) + Send + Sync>;
type CompleteFn<T> = Box<dyn FnOnce(Result<T, PipelineError>) + Send>;

/// Callbacks for one submission.
///
/// `on_complete` runs exactly once, with the result, a failure, or
/// `PipelineError::Cancelled`. Updates never follow it.
pub struct TaskCallbacks<T> {
    on_update: Option<UpdateFn>,
    on_complete: CompleteFn<T>,
    queue: Option<CallbackQueue>,
}

impl<T> TaskCallbacks<T> {
    pub fn new(on_complete: impl FnOnce(Result<T, PipelineError>) + Send + 'static) -> Self {
        Self {
            on_update: None,
            on_complete: Box::new(on_complete),
            queue: None,
        }
    }

    /// Receives progress and previews.
    pub fn with_updates(mut self, on_update: impl Fn(TaskUpdate) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(on_update));
        self
    }

    /// Runs the callbacks on `queue` instead of the pipeline default.
    pub fn on_queue(mut self, queue: CallbackQueue) -> Self {
        self.queue = Some(queue);
        self
    }
}

enum Completion {
    Image(CompleteFn<ImageResponse>),
    Data(CompleteFn<DataResponse>),
}

/// Type-erased callbacks bound to their queue.
pub(crate) struct Delivery {
    on_update: Option<UpdateFn>,
    completion: Completion,
    queue: CallbackQueue,
}

impl Delivery {
    pub(crate) fn image(callbacks: TaskCallbacks<ImageResponse>, default_queue: &CallbackQueue) -> Self {
        Self {
            on_update: callbacks.on_update,
            completion: Completion::Image(callbacks.on_complete),
            queue: callbacks.queue.unwrap_or_else(|| default_queue.clone()),
        }
    }

    pub(crate) fn data(callbacks: TaskCallbacks<DataResponse>, default_queue: &CallbackQueue) -> Self {
        Self {
            on_update: callbacks.on_update,
            completion: Completion::Data(callbacks.on_complete),
            queue: callbacks.queue.unwrap_or_else(|| default_queue.clone()),
        }
    }

    pub(crate) fn queue(&self) -> &CallbackQueue {
        &self.queue
    }

    pub(crate) fn update(&self, update: TaskUpdate) {
        if let Some(on_update) = &self.on_update {
            let on_update = Arc::clone(on_update);
            self.queue.dispatch(move || on_update(update));
        }
    }

    pub(crate) fn complete(self, result: Result<Output, PipelineError>) {
        let Delivery {
            completion, queue, ..
        } = self;
        match completion {
            Completion::Image(on_complete) => {
                let result = result.and_then(Output::into_image);
                queue.dispatch(move || on_complete(result));
            }
            Completion::Data(on_complete) => {
                let result = result.and_then(Output::into_data);
                queue.dispatch(move || on_complete(result));
            }
        }
    }

    pub(crate) fn fail(self, error: PipelineError) {
        self.complete(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    #[test]
    fn test_data_completion_receives_bytes() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let callbacks = TaskCallbacks::new(move |result: Result<DataResponse, PipelineError>| {
            *sink.lock() = Some(result.map(|r| r.data));
        });

        let delivery = Delivery::data(callbacks, &CallbackQueue::Inline);
        delivery.complete(Ok(Output::Data(DataResponse {
            data: Bytes::from_static(b"abc"),
            response: None,
            cache_type: None,
        })));

        assert_eq!(*seen.lock(), Some(Ok(Bytes::from_static(b"abc"))));
    }

    #[test]
    fn test_updates_and_failure() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let failure = Arc::new(Mutex::new(None));
        let (u, f) = (Arc::clone(&updates), Arc::clone(&failure));

        let callbacks = TaskCallbacks::new(move |result: Result<ImageResponse, PipelineError>| {
            *f.lock() = result.err();
        })
        .with_updates(move |update| {
            if let TaskUpdate::Progress(p) = update {
                u.lock().push(p.completed);
            }
        });

        let delivery = Delivery::image(callbacks, &CallbackQueue::Inline);
        delivery.update(TaskUpdate::Progress(Progress::new(1, 2)));
        delivery.update(TaskUpdate::Progress(Progress::new(2, 2)));
        delivery.fail(PipelineError::Cancelled);

        assert_eq!(*updates.lock(), vec![1, 2]);
        assert_eq!(*failure.lock(), Some(PipelineError::Cancelled));
    }
}
