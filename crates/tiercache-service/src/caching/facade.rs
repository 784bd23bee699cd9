use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::config::Config;
use crate::download::Transport;

use super::{
    CacheKey, Codec, CoalescingFetcher, FetchError, MemoryTier, StorageError, StorageTier,
};

/// The tier that answered a [`retrieve`](ObjectCache::retrieve).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Storage,
    Fetch,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Storage => "storage",
            Self::Fetch => "fetch",
        })
    }
}

struct Tiers<C: Codec> {
    codec: Arc<C>,
    memory: MemoryTier<C>,
    storage: Option<StorageTier>,
}

impl<C: Codec> Tiers<C> {
    /// Looks up memory, then storage. A storage hit is promoted into memory.
    fn lookup(&self, key: &CacheKey) -> Option<(C::Item, CacheSource)> {
        if let Some(item) = self.memory.get(key) {
            return Some((item, CacheSource::Memory));
        }

        let storage = self.storage.as_ref()?;
        let data = storage.get(key)?;
        match self.codec.decode(&data) {
            Ok(item) => {
                self.memory.put(key.clone(), Some(item.clone()));
                Some((item, CacheSource::Storage))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Dropping undecodable storage entry for `{}`", key);
                storage.remove(key);
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, item: Option<&C::Item>) {
        self.memory.put(key.clone(), item.cloned());

        let Some(storage) = &self.storage else {
            return;
        };
        match item {
            Some(item) => match self.codec.encode(item) {
                Some(data) => storage.put(key, Some(data.as_slice())),
                None => tracing::debug!("Not persisting `{}`", key),
            },
            None => storage.remove(key),
        }
    }
}

/// A two-tier cache of decoded objects, fronted by a [`CoalescingFetcher`].
///
/// Objects are looked up in the [`MemoryTier`] first, then in the [`StorageTier`] if one is
/// configured, and are finally fetched from their locator. A fetched object is written to both
/// tiers before it is handed out. Failed fetches are never cached.
pub struct ObjectCache<C: Codec> {
    tiers: Arc<Tiers<C>>,
    fetcher: CoalescingFetcher<C>,
}

impl<C: Codec> fmt::Debug for ObjectCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("memory", &self.tiers.memory)
            .field("storage", &self.tiers.storage)
            .field("fetcher", &self.fetcher)
            .finish()
    }
}

impl<C: Codec> Clone for ObjectCache<C> {
    fn clone(&self) -> Self {
        Self {
            tiers: Arc::clone(&self.tiers),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<C: Codec> ObjectCache<C> {
    /// Creates a cache from its parts. Without a `storage` tier, objects are only kept in memory.
    pub fn new(
        codec: C,
        in_memory_capacity: u64,
        storage: Option<StorageTier>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let codec = Arc::new(codec);
        let memory = MemoryTier::new(Arc::clone(&codec), in_memory_capacity);
        let fetcher = CoalescingFetcher::new(transport, Arc::clone(&codec));

        Self {
            tiers: Arc::new(Tiers {
                codec,
                memory,
                storage,
            }),
            fetcher,
        }
    }

    /// Creates a cache with the limits from `config`, persisting to its `cache_dir` if set.
    pub fn from_config(
        config: &Config,
        codec: C,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StorageError> {
        let storage = StorageTier::from_config(config)?;
        Ok(Self::new(
            codec,
            config.caches.in_memory_capacity,
            storage,
            transport,
        ))
    }

    pub fn memory(&self) -> &MemoryTier<C> {
        &self.tiers.memory
    }

    /// The storage tier, if persistence is enabled.
    pub fn storage(&self) -> Option<&StorageTier> {
        self.tiers.storage.as_ref()
    }

    pub fn fetcher(&self) -> &CoalescingFetcher<C> {
        &self.fetcher
    }

    /// Returns the object at `locator`, fetching it if no tier has it.
    pub async fn retrieve(&self, locator: &Url) -> Result<C::Item, FetchError> {
        self.retrieve_traced(locator).await.map(|(item, _)| item)
    }

    /// Like [`retrieve`](Self::retrieve), but also reports which tier answered.
    pub async fn retrieve_traced(
        &self,
        locator: &Url,
    ) -> Result<(C::Item, CacheSource), FetchError> {
        let key = CacheKey::from_locator(locator);
        metric!(counter("caches.access") += 1);

        if let Some(found) = self.tiers.lookup(&key) {
            tracing::trace!("Serving `{}` from {}", key, found.1);
            return Ok(found);
        }

        let tiers = Arc::clone(&self.tiers);
        let item = self
            .fetcher
            .fetch_with(locator, move |item| tiers.store(&key, Some(item)))
            .await?;

        Ok((item, CacheSource::Fetch))
    }

    /// Returns the cached object for `key` without fetching it.
    pub fn get(&self, key: &CacheKey) -> Option<C::Item> {
        self.tiers.lookup(key).map(|(item, _)| item)
    }

    /// Stores `item` in both tiers. `None` removes the object from both.
    pub fn insert(&self, key: &CacheKey, item: Option<C::Item>) {
        self.tiers.store(key, item.as_ref());
    }

    /// Removes the object from both tiers.
    pub fn remove(&self, key: &CacheKey) {
        self.tiers.memory.remove(key);
        if let Some(storage) = &self.tiers.storage {
            storage.remove(key);
        }
    }

    /// Removes all objects from both tiers.
    pub fn remove_all(&self) {
        self.tiers.memory.clear();
        if let Some(storage) = &self.tiers.storage {
            storage.clear();
        }
    }
}
