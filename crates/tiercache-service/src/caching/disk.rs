use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::config::Config;

use super::storage::{EntryMetadata, Storage};
use super::{CacheKey, FsStorage, StorageError};

/// Number and total size of the persisted entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub entries: usize,
    pub bytes: u64,
}

/// The persistent tier holding encoded objects.
///
/// Entries expire lazily: once an entry is older than `max_age` it is reported as missing, but
/// its bytes stay around until it is overwritten, evicted, removed or cleared. After every write,
/// the oldest entries are evicted until the total size fits into `max_disk_size`.
///
/// No error of the underlying [`Storage`] ever leaves this type. A failed read is a miss, and a
/// failed write or removal is logged and skipped.
#[derive(Debug)]
pub struct StorageTier {
    pub(super) storage: Arc<dyn Storage>,
    pub(super) max_disk_size: u64,
    pub(super) max_age: Duration,
    /// Serializes writes together with their eviction pass.
    pub(super) lock: Mutex<()>,
}

impl StorageTier {
    pub fn new(storage: Arc<dyn Storage>, max_disk_size: u64, max_age: Duration) -> Self {
        Self {
            storage,
            max_disk_size,
            max_age,
            lock: Mutex::new(()),
        }
    }

    /// Creates a file system backed tier, or `None` if no `cache_dir` is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, StorageError> {
        let Some(cache_dir) = config.cache_dir.as_deref() else {
            return Ok(None);
        };
        let caches = &config.caches;
        let storage = FsStorage::new(cache_dir, &caches.namespace)?;
        Ok(Some(Self::new(
            Arc::new(storage),
            caches.max_disk_size,
            caches.max_age,
        )))
    }

    pub(super) fn is_expired(&self, metadata: &EntryMetadata, now: SystemTime) -> bool {
        // a creation time in the future counts as fresh
        let age = now.duration_since(metadata.created).unwrap_or_default();
        age >= self.max_age
    }

    /// Returns the payload stored for `key`, unless it is missing, unreadable or expired.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let id = key.storage_id();
        tracing::trace!("Trying storage entry `{}`", id);

        let metadata = match self.storage.metadata(&id) {
            Ok(metadata) => metadata,
            Err(err) => {
                log_storage_error("stat", &id, &err);
                metric!(counter("caches.file.miss") += 1);
                return None;
            }
        };

        if self.is_expired(&metadata, SystemTime::now()) {
            tracing::debug!("Storage entry `{}` expired", id);
            metric!(counter("caches.file.miss") += 1);
            return None;
        }

        match self.storage.read_all(&id) {
            Ok(bytes) => {
                metric!(counter("caches.file.hit") += 1);
                Some(bytes)
            }
            Err(err) => {
                log_storage_error("read", &id, &err);
                metric!(counter("caches.file.miss") += 1);
                None
            }
        }
    }

    /// Writes the payload for `key` and runs an eviction pass. `None` removes the entry.
    pub fn put(&self, key: &CacheKey, bytes: Option<&[u8]>) {
        let Some(bytes) = bytes else {
            return self.remove(key);
        };

        let id = key.storage_id();
        let _guard = self.lock.lock();

        tracing::trace!("Writing storage entry `{}`", id);
        match self.storage.write_all(&id, bytes) {
            Ok(()) => {
                metric!(counter("caches.file.write") += 1);
                metric!(time_raw("caches.file.size") = bytes.len() as u64);
            }
            Err(err) => log_storage_error("write", &id, &err),
        }

        self.evict_to_fit();
    }

    /// Removes the entry for `key`. Removing a missing entry is not an error.
    pub fn remove(&self, key: &CacheKey) {
        let id = key.storage_id();
        if let Err(err) = self.storage.delete(&id) {
            log_storage_error("delete", &id, &err);
        }
    }

    /// Removes all entries by deleting and recreating the namespace.
    pub fn clear(&self) {
        let _guard = self.lock.lock();

        if let Err(err) = self.storage.delete_namespace() {
            log_storage_error("delete namespace", "", &err);
        }
        if let Err(err) = self.storage.create_namespace() {
            log_storage_error("create namespace", "", &err);
        }
    }

    /// Counts the persisted entries, including expired ones that have not been evicted yet.
    pub fn stats(&self) -> StorageStats {
        let ids = match self.storage.list_entries() {
            Ok(ids) => ids,
            Err(err) => {
                log_storage_error("list", "", &err);
                return StorageStats::default();
            }
        };

        let mut stats = StorageStats::default();
        for id in ids {
            if let Ok(metadata) = self.storage.metadata(&id) {
                stats.entries += 1;
                stats.bytes += metadata.size;
            }
        }
        stats
    }
}

/// Logs an absorbed storage error. Missing entries are expected and only traced.
pub(super) fn log_storage_error(operation: &str, id: &str, err: &StorageError) {
    match err {
        StorageError::NotFound => {
            tracing::trace!("Storage {} of `{}`: not found", operation, id);
        }
        StorageError::InvalidId(_) => {
            tracing::debug!(error = %err, "Storage {} of `{}` skipped", operation, id);
        }
        StorageError::Io(_) => {
            let error: &dyn std::error::Error = err;
            tracing::warn!(error, "Storage {} of `{}` failed", operation, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::MemoryStorage;

    #[test]
    fn test_expiry_boundary() {
        let tier = StorageTier::new(
            Arc::new(MemoryStorage::new()),
            u64::MAX,
            Duration::from_secs(60),
        );
        let now = SystemTime::now();
        let metadata = |age: Duration| EntryMetadata {
            size: 1,
            created: now - age,
            modified: now - age,
        };

        assert!(!tier.is_expired(&metadata(Duration::from_secs(59)), now));
        assert!(tier.is_expired(&metadata(Duration::from_secs(60)), now));
        assert!(tier.is_expired(&metadata(Duration::from_secs(61)), now));

        let future = EntryMetadata {
            size: 1,
            created: now + Duration::from_secs(10),
            modified: now,
        };
        assert!(!tier.is_expired(&future, now));
    }

    #[test]
    fn test_disabled_without_cache_dir() {
        let tier = StorageTier::from_config(&Config::default()).unwrap();
        assert!(tier.is_none());
    }

    #[test]
    fn test_namespace_outside_cache_dir_is_rejected() {
        let outer = crate::test::tempdir();
        let cache_dir = outer.path().join("cache");
        std::fs::create_dir(&cache_dir).unwrap();
        std::fs::write(outer.path().join("precious.txt"), b"keep me").unwrap();

        let mut config = Config {
            cache_dir: Some(cache_dir),
            ..Default::default()
        };
        config.caches.namespace = "..".into();

        let err = StorageTier::from_config(&config).unwrap_err();
        assert!(matches!(err, StorageError::InvalidId(_)));
        assert!(outer.path().join("precious.txt").is_file());
    }
}
