use std::fmt;
use std::sync::Arc;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

/// Extension appended to every persisted entry.
pub const ENTRY_EXTENSION: &str = ".cache";

/// The longest file name most file systems accept, in bytes.
const MAX_STORAGE_ID_LEN: usize = 255;

/// The key under which an object is stored in both cache tiers.
///
/// It is derived from the canonical textual form of a locator, so two requests for the same
/// resource always end up with the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    key: Arc<str>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self { key: key.into() }
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self { key: key.into() }
    }
}

impl CacheKey {
    /// Creates the [`CacheKey`] for the given locator.
    pub fn from_locator(locator: &Url) -> Self {
        Self::from(locator.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Returns the identifier used to address this key on the storage medium.
    ///
    /// Every character that is not ASCII alphanumeric is percent-escaped, so the identifier
    /// never contains path separators or dots.
    ///
    /// If the escaped identifier is too long to be used as a file name, a random identifier is
    /// returned instead. Such an entry can be written, but never found again by its key.
    pub fn storage_id(&self) -> String {
        let escaped = utf8_percent_encode(&self.key, NON_ALPHANUMERIC).to_string();
        if escaped.len() + ENTRY_EXTENSION.len() <= MAX_STORAGE_ID_LEN {
            return escaped + ENTRY_EXTENSION;
        }

        // TODO: hash overlong keys into a stable identifier instead of a random one.
        tracing::warn!(
            key_len = self.key.len(),
            "Cache key too long for storage, using a random identifier"
        );
        format!("{}{ENTRY_EXTENSION}", uuid::Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_resource_same_key() {
        let a: Url = "https://Example.com/images/../a.png".parse().unwrap();
        let b: Url = "https://example.com/a.png".parse().unwrap();

        assert_eq!(CacheKey::from_locator(&a), CacheKey::from_locator(&b));
        assert_eq!(
            CacheKey::from_locator(&a).as_str(),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn test_storage_id_escaping() {
        let key = CacheKey::from("https://example.com/a.png?size=2");
        assert_eq!(
            key.storage_id(),
            "https%3A%2F%2Fexample%2Ecom%2Fa%2Epng%3Fsize%3D2.cache"
        );
        // stable across calls
        assert_eq!(key.storage_id(), key.storage_id());

        let key = CacheKey::from("../../etc/passwd");
        assert!(!key.storage_id().contains('/'));
        assert!(!key.storage_id().starts_with('.'));
    }

    #[test]
    fn test_storage_id_fallback() {
        let key = CacheKey::from("x".repeat(300));
        let first = key.storage_id();
        let second = key.storage_id();

        assert!(first.ends_with(ENTRY_EXTENSION));
        assert!(first.len() <= MAX_STORAGE_ID_LEN);
        // the fallback is random, so the entry cannot be addressed again
        assert_ne!(first, second);
    }
}
