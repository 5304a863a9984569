//! Two-tier cache implementations.
//!
//! - [`MemoryImageCache`]: decoded images, LRU by cost, consulted when an
//!   image load starts
//! - [`DiskDataCache`]: original bytes on disk, consulted by the fetch stage

mod disk;
mod memory;
mod stats;

pub use disk::{CacheError, DiskDataCache};
pub use memory::MemoryImageCache;
pub use stats::CacheStats;
