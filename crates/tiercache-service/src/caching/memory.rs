use std::fmt;
use std::sync::Arc;

use super::{CacheKey, Codec};

type InMemoryCache<T> = moka::sync::Cache<CacheKey, T>;

/// The in-process tier holding decoded objects.
///
/// Capacity is a byte budget. Entries are weighed by [`Codec::weight`] plus the size of their
/// key, and moka discards entries on its own once the budget is exceeded. A miss is therefore
/// always a valid answer, and callers fall back to the next tier.
pub struct MemoryTier<C: Codec> {
    cache: InMemoryCache<C::Item>,
}

impl<C: Codec> fmt::Debug for MemoryTier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTier")
            .field("in-memory items", &self.cache.entry_count())
            .field("weighted size", &self.cache.weighted_size())
            .finish()
    }
}

impl<C: Codec> MemoryTier<C> {
    pub fn new(codec: Arc<C>, capacity: u64) -> Self {
        let cache = InMemoryCache::builder()
            .max_capacity(capacity)
            .name("objects")
            // NOTE: the key is counted towards the weight as well
            .weigher(move |k: &CacheKey, v: &C::Item| {
                let key_size = u32::try_from(k.as_str().len()).unwrap_or(u32::MAX);
                key_size.saturating_add(codec.weight(v))
            })
            .build();

        Self { cache }
    }

    pub fn get(&self, key: &CacheKey) -> Option<C::Item> {
        let item = self.cache.get(key);
        if item.is_some() {
            metric!(counter("caches.memory.hit") += 1);
        }
        item
    }

    /// Stores the object, or removes the entry when given `None`.
    pub fn put(&self, key: CacheKey, item: Option<C::Item>) {
        match item {
            Some(item) => self.cache.insert(key, item),
            None => self.cache.invalidate(&key),
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// The number of objects currently held.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::caching::BytesCodec;

    #[test]
    fn test_put_get_remove() {
        let memory = MemoryTier::new(Arc::new(BytesCodec), 1024);
        let key = CacheKey::from("https://example.com/a.png");

        assert_eq!(memory.get(&key), None);

        memory.put(key.clone(), Some(Bytes::from_static(b"a")));
        assert_eq!(memory.get(&key), Some(Bytes::from_static(b"a")));
        assert_eq!(memory.entry_count(), 1);

        memory.put(key.clone(), None);
        assert_eq!(memory.get(&key), None);

        memory.put(key.clone(), Some(Bytes::from_static(b"a")));
        memory.remove(&key);
        memory.remove(&key);
        assert_eq!(memory.get(&key), None);
    }

    #[test]
    fn test_clear() {
        let memory = MemoryTier::new(Arc::new(BytesCodec), 1024);
        for i in 0..4 {
            memory.put(CacheKey::from(format!("key-{i}")), Some(Bytes::from("value")));
        }
        assert_eq!(memory.entry_count(), 4);

        memory.clear();
        for i in 0..4 {
            assert_eq!(memory.get(&CacheKey::from(format!("key-{i}"))), None);
        }
    }

    #[test]
    fn test_capacity() {
        let memory = MemoryTier::new(Arc::new(BytesCodec), 100);
        for i in 0..10 {
            memory.put(CacheKey::from(format!("key-{i}")), Some(Bytes::from(vec![0; 40])));
        }

        // each entry weighs 45, so at most two fit
        assert!(memory.entry_count() <= 2);
    }
}
