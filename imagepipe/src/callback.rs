//! Execution contexts for caller callbacks.
//!
//! Completion and progress callbacks never run while the pipeline is
//! touching shared state. They are handed to a [`CallbackQueue`]:
//!
//! - `Inline` runs the callback directly on the pipeline's serialized
//!   context. Use it only for callbacks that return immediately (sending on
//!   a channel, flipping a flag).
//! - `Serial` runs callbacks one at a time, in dispatch order, on a
//!   dedicated thread.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send>;

/// Where callbacks run.
#[derive(Clone)]
pub enum CallbackQueue {
    Inline,
    Serial(SerialQueue),
}

impl CallbackQueue {
    /// Creates a serial queue backed by a new named thread.
    pub fn serial(name: &str) -> std::io::Result<Self> {
        SerialQueue::new(name).map(CallbackQueue::Serial)
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            CallbackQueue::Inline => job(),
            CallbackQueue::Serial(queue) => queue.dispatch(Box::new(job)),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, CallbackQueue::Inline)
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackQueue::Inline => f.write_str("Inline"),
            CallbackQueue::Serial(queue) => f.debug_tuple("Serial").field(&queue.name).finish(),
        }
    }
}

/// FIFO queue drained by one thread.
///
/// The thread exits once every clone of the queue has been dropped and the
/// backlog is empty.
#[derive(Clone)]
pub struct SerialQueue {
    name: Arc<str>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
            })?;

        Ok(Self {
            name: Arc::from(name),
            jobs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!(queue = %self.name, "Callback queue thread is gone, dropping callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        CallbackQueue::Inline.dispatch(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_serial_preserves_order_and_thread() {
        let queue = CallbackQueue::serial("imagepipe-test-callbacks").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            queue.dispatch(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            });
        }

        let received: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        let order: Vec<_> = received.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(received
            .iter()
            .all(|(_, name)| name.as_deref() == Some("imagepipe-test-callbacks")));
    }

    #[test]
    fn test_debug_names_queue() {
        let queue = CallbackQueue::serial("named").unwrap();
        assert_eq!(format!("{:?}", queue), "Serial(\"named\")");
        assert!(!queue.is_inline());
        assert!(CallbackQueue::Inline.is_inline());
    }
}
