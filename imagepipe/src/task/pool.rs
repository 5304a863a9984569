//! Keyed registry of live tasks.
//!
//! The pool is an arena: tasks live in a map keyed by a never-reused
//! [`TaskId`], and a second map from work key to id provides coalescing.
//! Dependents refer to their dependencies by id, so the task graph holds
//! no pointers in either direction.
//!
//! ```text
//! Request A ─┐
//!            ├──► publisher_for_key(K) ──► TaskId(7) ──► one unit of work
//! Request B ─┘         (coalesced)
//! ```
//!
//! With coalescing disabled every lookup builds a fresh task and nothing
//! is recorded in the key index.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::debug;

/// Arena identifier of a task. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Result of [`TaskPool::publisher_for_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publisher {
    pub id: TaskId,
    /// False when an existing live task was returned
    pub is_new: bool,
}

/// Coalescing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total publisher lookups
    pub total_requests: u64,
    /// Lookups answered by an existing task
    pub coalesced_requests: u64,
    /// Lookups that created a task
    pub new_requests: u64,
}

impl PoolStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

struct Entry<K, T> {
    key: K,
    task: T,
}

/// Arena of live tasks with a coalescing index.
pub struct TaskPool<K, T> {
    entries: HashMap<TaskId, Entry<K, T>>,
    index: HashMap<K, TaskId>,
    next_id: u64,
    coalescing: bool,
    stats: PoolStats,
}

impl<K, T> TaskPool<K, T>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(coalescing: bool) -> Self {
        Self {
            entries: HashMap::new(),
            index: HashMap::new(),
            next_id: 1,
            coalescing,
            stats: PoolStats::default(),
        }
    }

    /// Returns the live task for `key`, or stores the one built by `factory`.
    pub fn publisher_for_key(&mut self, key: K, factory: impl FnOnce() -> T) -> Publisher {
        self.stats.total_requests += 1;

        if self.coalescing {
            if let Some(&id) = self.index.get(&key) {
                self.stats.coalesced_requests += 1;
                debug!(task = %id, key = ?key, "Coalesced onto live task");
                return Publisher { id, is_new: false };
            }
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.stats.new_requests += 1;

        if self.coalescing {
            self.index.insert(key.clone(), id);
        }
        self.entries.insert(
            id,
            Entry {
                key,
                task: factory(),
            },
        );

        Publisher { id, is_new: true }
    }

    pub fn get(&self, id: TaskId) -> Option<&T> {
        self.entries.get(&id).map(|e| &e.task)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut T> {
        self.entries.get_mut(&id).map(|e| &mut e.task)
    }

    pub fn key(&self, id: TaskId) -> Option<&K> {
        self.entries.get(&id).map(|e| &e.key)
    }

    /// Evicts a task. Later lookups for its key build a new task.
    pub fn remove(&mut self, id: TaskId) -> Option<T> {
        let entry = self.entries.remove(&id)?;
        if self.index.get(&entry.key) == Some(&id) {
            self.index.remove(&entry.key);
        }
        Some(entry.task)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_coalescing(&self) -> bool {
        self.coalescing
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
