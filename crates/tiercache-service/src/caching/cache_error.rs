use std::io;

use thiserror::Error;

use crate::download::TransportError;

/// An error that happens when turning fetched bytes into a cached object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload was present, but is not a valid encoding of the object.
    ///
    /// The attached string contains details from the codec.
    #[error("malformed: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Creates a [`DecodeError::Malformed`] from any error the codec ran into.
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// An error that happens when an object could not be obtained from the remote source.
///
/// This is the only error that is ever surfaced to callers of
/// [`ObjectCache::retrieve`](super::ObjectCache::retrieve). It is cheap to clone, as a single
/// failed fetch is handed out to every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The transport failed to deliver the payload.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The transport succeeded, but did not return a usable payload.
    #[error("bad response: no usable payload")]
    BadResponse,
    /// The payload was fetched, but could not be decoded.
    #[error("decoding failed: {0}")]
    Decode(#[from] DecodeError),
    /// The fetch was torn down before it produced an outcome.
    #[error("fetch was interrupted")]
    Interrupted,
}

/// An error raised by a [`Storage`](super::Storage) implementation.
///
/// These never leave the [`StorageTier`](super::StorageTier), which treats them as a missing
/// entry or a skipped write.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The entry or namespace does not exist.
    #[error("not found")]
    NotFound,
    /// The identifier cannot be used to address an entry.
    #[error("invalid storage identifier `{0}`")]
    InvalidId(String),
    /// Any other I/O failure of the underlying medium.
    #[error("storage i/o failed")]
    Io(#[source] io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            _ => Self::Io(err),
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_from_io() {
        let err = StorageError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = StorageError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::from(DecodeError::Malformed("truncated".into()));
        assert_eq!(err.to_string(), "decoding failed: malformed: truncated");

        let err = FetchError::from(TransportError::Status(503));
        assert_eq!(err.to_string(), "server returned status 503");
    }
}
