//! Disk cache for original image bytes with LRU eviction.
//!
//! Every entry is a single file in a flat directory. The file name is the
//! hex SHA-256 of the key, so arbitrary URLs map to safe, fixed-length
//! names. Writes go to a temporary file first and are renamed into place.
//! Every write gets its own temporary file, so concurrent writes of one key
//! never share a path; the last rename wins.

use crate::cache::CacheStats;
use crate::traits::DataCache;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

/// Suffix source for temporary file names, unique within the process.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct DiskEntry {
    size: usize,
    last_accessed: SystemTime,
}

struct Index {
    entries: HashMap<String, DiskEntry>,
    size_bytes: usize,
    stats: CacheStats,
}

impl Index {
    fn refresh_stats(&mut self) {
        let (size, count) = (self.size_bytes, self.entries.len());
        self.stats.update_size(size, count);
    }
}

/// Persistent byte cache keyed by string.
pub struct DiskDataCache {
    directory: PathBuf,
    max_size_bytes: usize,
    index: Mutex<Index>,
}

impl DiskDataCache {
    /// Opens (creating if needed) a cache rooted at `directory`.
    ///
    /// Existing files are indexed using their modification time as the last
    /// access time, and the cache is trimmed if it is already over budget.
    pub fn new(directory: impl Into<PathBuf>, max_size_bytes: usize) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let cache = Self {
            directory,
            max_size_bytes,
            index: Mutex::new(Index {
                entries: HashMap::new(),
                size_bytes: 0,
                stats: CacheStats::new(),
            }),
        };
        cache.scan()?;
        cache.evict_if_over_limit();
        Ok(cache)
    }

    /// File name used for `key`.
    pub fn file_name(key: &str) -> String {
        Sha256::digest(key.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn size_bytes(&self) -> usize {
        self.index.lock().size_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.index.lock().stats.clone()
    }

    /// Writes an entry, returning any I/O error.
    pub fn store_sync(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let name = Self::file_name(key);
        let path = self.directory.join(&name);
        let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .directory
            .join(format!("{}.{}.{}.tmp", name, std::process::id(), sequence));

        fs::write(&temp, data)?;

        {
            // Rename under the index lock so the index describes the file
            // that ended up on disk.
            let mut index = self.index.lock();
            if let Err(e) = fs::rename(&temp, &path) {
                drop(index);
                let _ = fs::remove_file(&temp);
                return Err(e.into());
            }
            let entry = DiskEntry {
                size: data.len(),
                last_accessed: SystemTime::now(),
            };
            if let Some(previous) = index.entries.insert(name, entry) {
                index.size_bytes -= previous.size;
            }
            index.size_bytes += data.len();
            index.stats.writes += 1;
            index.refresh_stats();
        }

        self.evict_if_over_limit();
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut index = self.index.lock();
        for name in index.entries.keys() {
            let _ = fs::remove_file(self.directory.join(name));
        }
        index.entries.clear();
        index.size_bytes = 0;
        index.refresh_stats();
    }

    fn scan(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(".tmp") {
                let _ = fs::remove_file(entry.path());
                continue;
            }
            if name.len() != 64 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let size = metadata.len() as usize;
            let last_accessed = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            index.size_bytes += size;
            index.entries.insert(name, DiskEntry { size, last_accessed });
        }

        index.refresh_stats();
        Ok(())
    }

    /// Evicts least recently accessed entries down to 90% of the budget.
    pub fn evict_if_over_limit(&self) {
        let mut index = self.index.lock();
        if index.size_bytes <= self.max_size_bytes {
            return;
        }

        let target_size = (self.max_size_bytes as f64 * 0.9) as usize;
        let mut by_age: Vec<(String, DiskEntry)> = index
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), *entry))
            .collect();
        by_age.sort_by_key(|(_, entry)| entry.last_accessed);

        let mut evicted = 0u64;
        let mut freed = 0usize;
        for (name, entry) in by_age {
            if index.size_bytes <= target_size {
                break;
            }
            match fs::remove_file(self.directory.join(&name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %name, error = %e, "Failed to evict disk cache entry");
                    continue;
                }
            }
            index.entries.remove(&name);
            index.size_bytes -= entry.size;
            freed += entry.size;
            evicted += 1;
        }

        index.stats.evictions += evicted;
        index.refresh_stats();

        info!(
            evicted,
            freed_bytes = freed,
            size_bytes = index.size_bytes,
            "Disk cache eviction"
        );
    }
}

impl DataCache for DiskDataCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        let name = Self::file_name(key);
        let known = self.index.lock().entries.contains_key(&name);

        let data = if known {
            fs::read(self.directory.join(&name)).ok()
        } else {
            None
        };

        let mut index = self.index.lock();
        match data {
            Some(data) => {
                if let Some(entry) = index.entries.get_mut(&name) {
                    entry.last_accessed = SystemTime::now();
                }
                index.stats.record_lookup(true);
                Some(Bytes::from(data))
            }
            None => {
                // Drop index entries whose file disappeared.
                if let Some(entry) = index.entries.remove(&name) {
                    index.size_bytes -= entry.size;
                    index.refresh_stats();
                }
                index.stats.record_lookup(false);
                None
            }
        }
    }

    fn store(&self, key: &str, data: Bytes) {
        if let Err(e) = self.store_sync(key, &data) {
            warn!(key, error = %e, "Failed to write disk cache entry");
            self.index.lock().stats.write_failures += 1;
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.index.lock().entries.contains_key(&Self::file_name(key))
    }

    fn remove(&self, key: &str) {
        let name = Self::file_name(key);
        let mut index = self.index.lock();
        if let Some(entry) = index.entries.remove(&name) {
            index.size_bytes -= entry.size;
            index.refresh_stats();
            let _ = fs::remove_file(self.directory.join(&name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_cache(max: usize) -> (DiskDataCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskDataCache::new(temp_dir.path(), max).unwrap();
        (cache, temp_dir)
    }

    #[test]
    fn test_file_name_is_hex_sha256() {
        let name = DiskDataCache::file_name("https://example.com/a.png");
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, DiskDataCache::file_name("https://example.com/b.png"));
    }

    #[test]
    fn test_store_and_get() {
        let (cache, _temp) = create_temp_cache(1_000_000);
        assert!(cache.get("k").is_none());

        cache.store("k", Bytes::from_static(b"hello"));
        assert!(cache.contains("k"));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"hello")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(cache.size_bytes(), 5);
    }

    #[test]
    fn test_overwrite_updates_size() {
        let (cache, _temp) = create_temp_cache(1_000_000);
        cache.store("k", Bytes::from_static(b"hello"));
        cache.store("k", Bytes::from_static(b"hi"));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.size_bytes(), 2);
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskDataCache::new(temp_dir.path(), 1_000_000).unwrap();
            cache.store("k", Bytes::from_static(b"persisted"));
        }

        let cache = DiskDataCache::new(temp_dir.path(), 1_000_000).unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"persisted")));
    }

    #[test]
    fn test_eviction_to_ninety_percent() {
        let (cache, _temp) = create_temp_cache(100);
        cache.store("a", Bytes::from(vec![0u8; 40]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.store("b", Bytes::from(vec![0u8; 40]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.store("c", Bytes::from(vec![0u8; 40]));

        // 120 > 100: evict oldest until <= 90.
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.size_bytes(), 80);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let (cache, temp) = create_temp_cache(1_000_000);
        cache.store("a", Bytes::from_static(b"1"));
        cache.store("b", Bytes::from_static(b"2"));

        cache.remove("a");
        assert!(!cache.contains("a"));
        assert!(!temp.path().join(DiskDataCache::file_name("a")).exists());

        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let (cache, temp) = create_temp_cache(1_000_000);
        cache.store("a", Bytes::from_static(b"1"));
        fs::remove_file(temp.path().join(DiskDataCache::file_name("a"))).unwrap();

        assert!(cache.get("a").is_none());
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_concurrent_stores_of_one_key_all_succeed() {
        let (cache, temp) = create_temp_cache(100_000_000);
        let cache = std::sync::Arc::new(cache);
        let large = vec![b'L'; 1 << 20];
        let small = vec![b's'; 1024];

        for _ in 0..20 {
            let writers: Vec<_> = [large.clone(), small.clone()]
                .into_iter()
                .map(|payload| {
                    let cache = cache.clone();
                    std::thread::spawn(move || cache.store_sync("k", &payload))
                })
                .collect();
            for writer in writers {
                writer.join().unwrap().unwrap();
            }

            let stored = cache.get("k").unwrap();
            assert!(stored[..] == large[..] || stored[..] == small[..]);
            assert_eq!(cache.size_bytes(), stored.len());
        }

        assert_eq!(cache.entry_count(), 1);
        let leftovers = fs::read_dir(temp.path())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_scan_ignores_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("README"), b"not a cache entry").unwrap();
        fs::write(temp_dir.path().join("abc.tmp"), b"partial").unwrap();

        let cache = DiskDataCache::new(temp_dir.path(), 1_000_000).unwrap();
        assert_eq!(cache.entry_count(), 0);
        assert!(!temp_dir.path().join("abc.tmp").exists());
    }
}
