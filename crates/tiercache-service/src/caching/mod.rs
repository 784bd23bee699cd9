//! # Caching infrastructure
//!
//! This module contains a two-tier cache for binary objects that are fetched from a remote
//! locator, such as images behind a URL. Fetching is slow and decoding is not free, so both the
//! raw payload and the decoded object are kept around.
//!
//! ## Cache Layers
//!
//! The cache consists of the following layers:
//!
//! - The [`MemoryTier`], a bounded in-process cache of decoded objects. It discards entries
//!   under pressure on its own, so a miss is always a valid answer.
//! - The [`StorageTier`], which persists the encoded payload to a [`Storage`], by default the
//!   file system via [`FsStorage`]. It enforces a maximum entry age and a size budget.
//! - The [`CoalescingFetcher`], which fetches an object via a [`Transport`](crate::download::Transport)
//!   and decodes it with a [`Codec`]. It deduplicates concurrent fetches of the same locator.
//!
//! A request through [`ObjectCache::retrieve`] goes through the following steps:
//! - First, it goes through the in-memory layer.
//! - On miss, it will try to load the payload from storage, if enabled. A hit is decoded and
//!   promoted into memory.
//! - On miss, it will fetch and decode the object, or join a fetch that is already running.
//! - The freshly fetched object is written to storage and memory before it is handed out. A
//!   failed fetch is handed out to every waiting caller, and nothing is cached.
//!
//! ### Expiry and Eviction
//!
//! Entries in storage are never refreshed. An entry whose creation time is `max_age` or more in the
//! past is reported as missing, but its bytes are only removed when the entry is overwritten or
//! evicted, or by an explicit [`StorageTier::purge_expired`].
//!
//! After every write, an eviction pass sums the size of all entries. If the total is above
//! `max_disk_size`, entries are removed in order of their last modification, oldest first, until
//! enough bytes have been freed.
//!
//! ### Metrics
//!
//! Here is a list of metrics that are collected:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served by the in-memory layer.
//! - `caches.file.hit` / `caches.file.miss`: Lookups in the storage layer.
//! - `caches.computation`: Actual fetches being run, and not served by any of the caching layers.
//! - `caches.channel.hit` / `caches.channel.miss`: Fetches that were joined or started.
//! - `caches.file.write` and `caches.file.size`: Written entries and their size in bytes.
//! - `caches.file.evicted`: Entries removed by an eviction or purge pass.
//!
//! ### Configuration
//!
//! Storage is gated by the [`Config::cache_dir`](crate::config::Config::cache_dir) option. If no
//! `cache_dir` is configured, objects are fetched directly after a miss in memory.
//! [`Config::caches`](crate::config::Config::caches) holds the limits of both tiers.
//!
//! ## Errors
//!
//! The only error a caller ever sees is a [`FetchError`]. Failures of the storage layer are
//! [`StorageError`]s, which are logged and treated as a miss or a skipped write.

mod cache_error;
mod cache_key;
mod codec;
mod disk;
mod eviction;
mod facade;
mod fetcher;
mod fs;
mod memory;
mod storage;

pub use cache_error::{DecodeError, FetchError, StorageError};
pub use cache_key::{CacheKey, ENTRY_EXTENSION};
pub use codec::{BytesCodec, Codec, JsonCodec};
pub use disk::{StorageStats, StorageTier};
pub use eviction::EvictionStats;
pub use facade::{CacheSource, ObjectCache};
pub use fetcher::CoalescingFetcher;
pub use fs::FsStorage;
pub use memory::MemoryTier;
pub use storage::{EntryMetadata, MemoryStorage, Storage};
