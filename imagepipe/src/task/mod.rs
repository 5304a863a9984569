//! Shared work units and the registry that coalesces them.

mod async_task;
mod pool;

pub use async_task::{AsyncTask, Event, Subscribe, SubscriptionId, TaskState, Unsubscribe};
pub use pool::{PoolStats, Publisher, TaskId, TaskPool};
