//! tiercache: a two-tier object cache fronted by a request-coalescing fetcher.
//!
//! See the [`caching`] module for an overview of how the tiers fit together.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
pub mod utils;

#[cfg(test)]
use tiercache_test as test;
