//! # Coalescing history caches
//!
//! The order and trade history endpoints are slow and rate-limited, while the
//! dashboard likes to ask for the same data from several places at once. This
//! module contains the caching layer that sits in between, our central
//! [`CacheError`] type, and the [`CacheKey`] fingerprinting that makes
//! equivalent queries collapse onto one entry.
//!
//! ## How a request flows
//!
//! A call to [`Cacher::fetch_cached`] goes through the following steps:
//! - The request's parameters are normalized into a [`CacheKey`].
//! - If the store holds an entry younger than the caller's max age (and no
//!   refresh is forced), it is returned immediately.
//! - If a fetch for the same key is already in flight, the caller attaches
//!   to it and observes exactly that fetch's result. This is the coalescing
//!   part: the second caller never triggers a second upstream call.
//! - Otherwise a fetch is registered and spawned. On success the result
//!   replaces the store entry wholesale; on failure nothing is written. In
//!   both cases the in-flight slot is released and every attached waiter is
//!   resolved with the same outcome.
//!
//! Fetches for distinct keys proceed independently; there is deliberately no
//! global "one fetch at a time" gate serializing unrelated queries.
//!
//! ## Freshness
//!
//! Entries carry the instant they were fetched, and nothing else decides
//! their fate: there is no expiry sweep, and staleness is evaluated lazily
//! at read time against the caller-supplied max age. Entries disappear only
//! when overwritten, evicted by capacity pressure, or explicitly cleared via
//! [`Cacher::clear`].
//!
//! ## Metrics
//!
//! Each metric is tagged with a `cache` field naming the cache:
//!
//! - `caches.access`: all accesses.
//! - `caches.memory.hit`: accesses served from the store.
//! - `caches.computation`: upstream fetches actually started.
//! - `caches.fetch.duration`: upstream fetch latency.
//!
//! Independent of statsd, each [`Cacher`] keeps its own counters which
//! [`Cacher::status`] exposes as a [`CacheStatus`] snapshot.
//!
//! ## [`CacheError`]
//!
//! Errors come in three kinds: [`CacheError::NotAuthenticated`] (no
//! credential, detected before any network call), [`CacheError::Network`]
//! (transport-level) and [`CacheError::Logical`] (the server answered but
//! signaled failure in its envelope). None of them are cached; a failed key
//! retries cleanly on the next call.

use crate::config::Config;

mod cache_error;
mod cache_key;
mod config;
mod memory;

pub use cache_error::{CacheContents, CacheError};
pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use config::{Cache, CacheName};
pub use memory::{CacheStatus, Cacher, FetchOptions, FetchRequest};

/// Cache handles for everything the history service keeps in memory.
pub struct Caches {
    /// Open and historical orders per sub-account set.
    pub orders: Cache,
    /// Executed trades, including fees.
    pub trades: Cache,
}

impl Caches {
    pub fn from_config(config: &Config) -> Self {
        Self {
            orders: Cache::from_config(CacheName::Orders, config),
            trades: Cache::from_config(CacheName::Trades, config),
        }
    }
}
