use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::StorageError;

/// Size and timestamps of a persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Size of the encoded payload in bytes.
    pub size: u64,
    /// When the entry was first written.
    pub created: SystemTime,
    /// When the entry was last written. Used as the recency signal for eviction.
    pub modified: SystemTime,
}

/// Key-addressed byte storage on some medium.
///
/// A storage is bound to a single namespace when it is constructed. Entries are addressed by
/// their storage identifier, see [`CacheKey::storage_id`](super::CacheKey::storage_id).
///
/// Every operation may fail. Failures are never surfaced to users of the cache, the
/// [`StorageTier`](super::StorageTier) treats them as a missing entry or a skipped write.
pub trait Storage: fmt::Debug + Send + Sync {
    fn exists(&self, id: &str) -> Result<bool, StorageError>;

    fn metadata(&self, id: &str) -> Result<EntryMetadata, StorageError>;

    fn read_all(&self, id: &str) -> Result<Vec<u8>, StorageError>;

    /// Replaces the contents of the entry, which counts as a freshly created entry.
    ///
    /// Readers either see the previous or the new contents, never a partial write. A missing
    /// namespace is created on demand.
    fn write_all(&self, id: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Deletes the entry, failing with [`StorageError::NotFound`] if it does not exist.
    fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Returns the identifiers of all entries in the namespace.
    fn list_entries(&self) -> Result<Vec<String>, StorageError>;

    fn create_namespace(&self) -> Result<(), StorageError>;

    /// Deletes the namespace along with all of its entries.
    fn delete_namespace(&self) -> Result<(), StorageError>;
}

/// Checks that `id` addresses a single entry directly inside the namespace.
///
/// Identifiers must not be empty, contain path separators, or start with a dot.
pub(super) fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(StorageError::InvalidId(id.to_owned()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct StoredEntry {
    bytes: Vec<u8>,
    created: SystemTime,
    modified: SystemTime,
}

#[derive(Debug)]
struct Namespace {
    present: bool,
    entries: BTreeMap<String, StoredEntry>,
}

/// A [`Storage`] that keeps everything in process memory.
///
/// The timestamps of entries can be changed at will, which makes it useful to test expiry and
/// eviction without touching the file system.
#[derive(Debug)]
pub struct MemoryStorage {
    namespace: Mutex<Namespace>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            namespace: Mutex::new(Namespace {
                present: true,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Overrides the timestamps of an existing entry.
    pub fn set_times(
        &self,
        id: &str,
        created: SystemTime,
        modified: SystemTime,
    ) -> Result<(), StorageError> {
        validate_id(id)?;
        let mut namespace = self.namespace.lock();
        let entry = namespace
            .entries
            .get_mut(id)
            .ok_or(StorageError::NotFound)?;
        entry.created = created;
        entry.modified = modified;
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        Ok(self.namespace.lock().entries.contains_key(id))
    }

    fn metadata(&self, id: &str) -> Result<EntryMetadata, StorageError> {
        validate_id(id)?;
        let namespace = self.namespace.lock();
        let entry = namespace.entries.get(id).ok_or(StorageError::NotFound)?;
        Ok(EntryMetadata {
            size: entry.bytes.len() as u64,
            created: entry.created,
            modified: entry.modified,
        })
    }

    fn read_all(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        validate_id(id)?;
        let namespace = self.namespace.lock();
        let entry = namespace.entries.get(id).ok_or(StorageError::NotFound)?;
        Ok(entry.bytes.clone())
    }

    fn write_all(&self, id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_id(id)?;
        let mut namespace = self.namespace.lock();
        namespace.present = true;

        let now = SystemTime::now();
        namespace.entries.insert(
            id.to_owned(),
            StoredEntry {
                bytes: bytes.to_vec(),
                created: now,
                modified: now,
            },
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        match self.namespace.lock().entries.remove(id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        }
    }

    fn list_entries(&self) -> Result<Vec<String>, StorageError> {
        let namespace = self.namespace.lock();
        if !namespace.present {
            return Err(StorageError::NotFound);
        }
        Ok(namespace.entries.keys().cloned().collect())
    }

    fn create_namespace(&self) -> Result<(), StorageError> {
        self.namespace.lock().present = true;
        Ok(())
    }

    fn delete_namespace(&self) -> Result<(), StorageError> {
        let mut namespace = self.namespace.lock();
        if !namespace.present {
            return Err(StorageError::NotFound);
        }
        namespace.present = false;
        namespace.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_overwrite_is_fresh_entry() {
        let storage = MemoryStorage::new();
        storage.write_all("a.cache", b"first").unwrap();

        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        storage.set_times("a.cache", created, created).unwrap();

        storage.write_all("a.cache", b"second!").unwrap();
        let metadata = storage.metadata("a.cache").unwrap();

        assert_eq!(metadata.size, 7);
        assert!(metadata.created > created);
        assert!(metadata.modified > created);
        assert_eq!(storage.read_all("a.cache").unwrap(), b"second!");
    }

    #[test]
    fn test_missing_namespace() {
        let storage = MemoryStorage::new();
        storage.write_all("a.cache", b"a").unwrap();
        storage.delete_namespace().unwrap();

        assert!(storage.list_entries().unwrap_err().is_not_found());
        assert!(storage.delete_namespace().unwrap_err().is_not_found());
        assert!(!storage.exists("a.cache").unwrap());

        storage.create_namespace().unwrap();
        assert!(storage.list_entries().unwrap().is_empty());

        // writing brings back a missing namespace
        storage.delete_namespace().unwrap();
        storage.write_all("b.cache", b"b").unwrap();
        assert_eq!(storage.list_entries().unwrap(), ["b.cache"]);
    }

    #[test]
    fn test_invalid_ids() {
        let storage = MemoryStorage::new();

        for id in ["", ".cache", "../escape.cache", "a/b.cache", "a\\b.cache"] {
            assert!(matches!(
                storage.write_all(id, b"x"),
                Err(StorageError::InvalidId(_))
            ));
            assert!(matches!(storage.exists(id), Err(StorageError::InvalidId(_))));
        }
        assert!(storage.list_entries().unwrap().is_empty());
    }
}
