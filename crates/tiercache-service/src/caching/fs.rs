use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use super::storage::{EntryMetadata, Storage, validate_id};
use super::StorageError;

/// A [`Storage`] backed by a directory on the local file system.
///
/// Entries live in `<cache_dir>/<namespace>/<id>`. New contents are first written to a temporary
/// file in the sibling directory `<cache_dir>/tmp` and then atomically moved into place.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    tmp_dir: PathBuf,
}

impl FsStorage {
    /// Creates a storage for `namespace` below `cache_dir`, creating the directory if needed.
    ///
    /// The namespace must be a single plain directory name, other than the `tmp` directory used
    /// for in-progress writes.
    pub fn new(cache_dir: &Path, namespace: &str) -> Result<Self, StorageError> {
        let mut components = Path::new(namespace).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name != "tmp" && name == namespace
        );
        if !valid {
            return Err(StorageError::InvalidId(namespace.to_owned()));
        }

        let storage = Self {
            root: cache_dir.join(namespace),
            tmp_dir: cache_dir.join("tmp"),
        };
        storage.create_namespace()?;
        Ok(storage)
    }

    /// The directory holding the entries of this namespace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &str) -> Result<PathBuf, StorageError> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    /// Create a new temporary file next to the namespace.
    fn tempfile(&self) -> io::Result<NamedTempFile> {
        // A concurrent `clear` could remove the directories we are operating in, so retry the
        // fs operations.
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(&self.tmp_dir) {
                sentry::with_scope(
                    |scope| scope.set_extra("path", self.tmp_dir.display().to_string().into()),
                    || tracing::error!("Failed to create temp directory: {:?}", e),
                );
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new().prefix("tmp").tempfile_in(&self.tmp_dir) {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    sentry::with_scope(
                        |scope| scope.set_extra("path", self.tmp_dir.display().to_string().into()),
                        || tracing::error!("Failed to create temp file: {:?}", e),
                    );
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn persist_tempfile(&self, mut temp_file: NamedTempFile, path: &Path) -> io::Result<()> {
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(&self.root) {
                sentry::with_scope(
                    |scope| scope.set_extra("path", self.root.display().to_string().into()),
                    || tracing::error!("Failed to create cache directory: {:?}", e),
                );
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match temp_file.persist(path) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    temp_file = e.file;
                    sentry::with_scope(
                        |scope| scope.set_extra("path", path.display().to_string().into()),
                        || tracing::error!("Failed to persist cache file: {:?}", e.error),
                    );
                    if retries > MAX_RETRIES {
                        return Err(e.error);
                    }
                }
            }
        }
    }
}

impl Storage for FsStorage {
    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.path(id)?.is_file())
    }

    fn metadata(&self, id: &str) -> Result<EntryMetadata, StorageError> {
        let metadata = self.path(id)?.metadata()?;
        let modified = metadata.modified()?;
        // not every file system records the creation time
        let created = metadata.created().unwrap_or(modified);

        Ok(EntryMetadata {
            size: metadata.len(),
            created,
            modified,
        })
    }

    fn read_all(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.path(id)?)?)
    }

    fn write_all(&self, id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(id)?;

        let mut temp_file = self.tempfile()?;
        temp_file.write_all(bytes)?;
        temp_file.flush()?;

        self.persist_tempfile(temp_file, &path)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        Ok(fs::remove_file(self.path(id)?)?)
    }

    fn list_entries(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = vec![];
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => entries.push(name),
                Err(name) => tracing::debug!("Skipping foreign file `{:?}`", name),
            }
        }
        Ok(entries)
    }

    fn create_namespace(&self) -> Result<(), StorageError> {
        Ok(fs::create_dir_all(&self.root)?)
    }

    fn delete_namespace(&self) -> Result<(), StorageError> {
        Ok(fs::remove_dir_all(&self.root)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use filetime::FileTime;

    use super::*;
    use crate::test;

    #[test]
    fn test_write_read_delete() {
        let tempdir = test::tempdir();
        let storage = FsStorage::new(tempdir.path(), "objects").unwrap();

        storage.write_all("a.cache", b"hello").unwrap();
        assert!(tempdir.path().join("objects/a.cache").is_file());
        assert!(storage.exists("a.cache").unwrap());
        assert_eq!(storage.read_all("a.cache").unwrap(), b"hello");
        assert_eq!(storage.metadata("a.cache").unwrap().size, 5);

        storage.write_all("a.cache", b"bye").unwrap();
        assert_eq!(storage.read_all("a.cache").unwrap(), b"bye");

        storage.delete("a.cache").unwrap();
        assert!(!storage.exists("a.cache").unwrap());
        assert!(storage.delete("a.cache").unwrap_err().is_not_found());
        assert!(storage.read_all("a.cache").unwrap_err().is_not_found());
    }

    #[test]
    fn test_temp_files_outside_namespace() {
        let tempdir = test::tempdir();
        let storage = FsStorage::new(tempdir.path(), "objects").unwrap();

        storage.write_all("a.cache", b"a").unwrap();
        storage.write_all("b.cache", b"b").unwrap();
        fs::create_dir(storage.root().join("nested")).unwrap();

        let mut entries = storage.list_entries().unwrap();
        entries.sort();
        assert_eq!(entries, ["a.cache", "b.cache"]);
        assert!(tempdir.path().join("tmp").is_dir());
    }

    #[test]
    fn test_invalid_ids() {
        let tempdir = test::tempdir();
        let storage = FsStorage::new(tempdir.path(), "objects").unwrap();

        for id in ["", "../escape.cache", ".hidden", "a/b.cache"] {
            assert!(matches!(
                storage.write_all(id, b"x"),
                Err(StorageError::InvalidId(_))
            ));
        }
    }

    #[test]
    fn test_namespace_stays_inside_cache_dir() {
        let outer = test::tempdir();
        let cache_dir = outer.path().join("cache");
        fs::create_dir(&cache_dir).unwrap();
        fs::write(outer.path().join("precious.txt"), b"keep me").unwrap();

        for namespace in ["..", "", ".", "a/b", "/abs", "tmp", "../objects"] {
            assert!(
                matches!(
                    FsStorage::new(&cache_dir, namespace),
                    Err(StorageError::InvalidId(_))
                ),
                "{namespace:?} was accepted"
            );
        }
        assert!(outer.path().join("precious.txt").is_file());

        let storage = FsStorage::new(&cache_dir, "objects").unwrap();
        assert_eq!(storage.root(), cache_dir.join("objects"));
    }

    #[test]
    fn test_namespace_lifecycle() {
        let tempdir = test::tempdir();
        let storage = FsStorage::new(tempdir.path(), "objects").unwrap();
        storage.write_all("a.cache", b"a").unwrap();

        storage.delete_namespace().unwrap();
        assert!(!storage.root().exists());
        assert!(storage.list_entries().unwrap_err().is_not_found());

        // writing recreates the namespace
        storage.write_all("a.cache", b"a").unwrap();
        assert_eq!(storage.list_entries().unwrap(), ["a.cache"]);
    }

    #[test]
    fn test_modified_time() {
        let tempdir = test::tempdir();
        let storage = FsStorage::new(tempdir.path(), "objects").unwrap();
        storage.write_all("a.cache", b"a").unwrap();

        let mtime = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(
            storage.root().join("a.cache"),
            FileTime::from_system_time(mtime),
        )
        .unwrap();

        let metadata = storage.metadata("a.cache").unwrap();
        assert_eq!(metadata.modified, mtime);
    }
}
