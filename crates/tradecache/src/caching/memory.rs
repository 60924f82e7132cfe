use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;

use super::{Cache, CacheContents, CacheKey};

/// One upstream request that can be cached and coalesced.
///
/// The cacher moves the request into the spawned fetch, so implementations
/// should be cheap to clone (`Arc` internals).
pub trait FetchRequest: Clone + Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// The canonical fingerprint of this request's parameters.
    ///
    /// Requests that are permutations of the same logical query must return
    /// equal keys, so that they collapse onto one entry and one fetch.
    fn cache_key(&self) -> CacheKey;

    /// Performs the upstream call.
    ///
    /// Implementations must not retry internally. Retry policy belongs to
    /// the caller of the cacher, not to this layer.
    fn fetch(self) -> BoxFuture<'static, CacheContents<Self::Item>>;
}

/// Per-call freshness controls for [`Cacher::fetch_cached`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Bypass the store and always go upstream.
    ///
    /// The result still lands in the store, and concurrent callers for the
    /// same key still share the forced fetch.
    pub force_refresh: bool,
    /// Freshness window. An entry older than this is considered stale and
    /// refetched on read. Defaults to the cache's configured max age.
    pub max_age: Option<Duration>,
}

impl FetchOptions {
    pub fn force_refresh() -> Self {
        FetchOptions {
            force_refresh: true,
            max_age: None,
        }
    }

    pub fn max_age(max_age: Duration) -> Self {
        FetchOptions {
            force_refresh: false,
            max_age: Some(max_age),
        }
    }
}

/// A read-only snapshot of one cache's bookkeeping, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Number of entries currently in the store.
    pub entry_count: u64,
    /// When the store last received a successful fetch result.
    pub last_update: Option<DateTime<Utc>>,
    /// Upstream fetches started since construction or the last clear.
    pub request_count: u64,
    /// Reads served from the store without going upstream.
    pub hit_count: u64,
    /// `hit_count / (hit_count + request_count)`, or `0.0` when idle.
    pub hit_rate: f64,
}

/// An entry in the store. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone)]
struct Entry<T> {
    payload: T,
    fetched_at: Instant,
}

impl<T> Entry<T> {
    fn is_fresh(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() < max_age
    }
}

/// The settled-or-pending handle all waiters for one key attach to.
type InFlight<T> = Shared<BoxFuture<'static, CacheContents<T>>>;

#[derive(Debug, Default)]
struct Stats {
    requests: AtomicU64,
    hits: AtomicU64,
    /// Milliseconds since the epoch; 0 means "never".
    last_update_ms: AtomicU64,
}

impl Stats {
    fn mark_updated(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_update_ms.store(now, Ordering::Relaxed);
    }

    fn last_update(&self) -> Option<DateTime<Utc>> {
        match self.last_update_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms as i64),
        }
    }

    fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.last_update_ms.store(0, Ordering::Relaxed);
    }
}

/// Removes a key's in-flight slot when its fetch settles.
///
/// Held inside the fetch future, so the slot is released on success, failure
/// and panic alike, before any waiter observes the result. A failed fetch can
/// therefore never wedge its key into a non-retriable state.
struct ReleaseSlot<T> {
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight<T>>>>,
    key: CacheKey,
}

impl<T> Drop for ReleaseSlot<T> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}

/// A TTL-bound in-memory cache that coalesces concurrent fetches.
///
/// Sits between application callers and the slow, rate-limited upstream API.
/// Lookups are keyed by the request's [`CacheKey`]; concurrent calls for the
/// same key share a single upstream fetch, while distinct keys proceed
/// independently.
///
/// There is no expiry sweep: entries stay in the store until overwritten or
/// explicitly cleared, and staleness is evaluated lazily at read time
/// against the caller-supplied max age.
pub struct Cacher<R: FetchRequest> {
    config: Cache,

    /// The entry store. Reads never block; moka keeps mutation atomic with
    /// respect to concurrent readers.
    store: moka::sync::Cache<CacheKey, Entry<R::Item>>,

    /// At most one pending fetch per key at any instant. The
    /// check-then-register sequence happens under this lock.
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight<R::Item>>>>,

    stats: Arc<Stats>,
}

impl<R: FetchRequest> std::fmt::Debug for Cacher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self
            .in_flight
            .try_lock()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("Cacher")
            .field("config", &self.config)
            .field("entries", &self.store.entry_count())
            .field("in-flight fetches", &in_flight)
            .finish()
    }
}

impl<R: FetchRequest> Clone for Cacher<R> {
    fn clone(&self) -> Self {
        Cacher {
            config: self.config.clone(),
            store: self.store.clone(),
            in_flight: Arc::clone(&self.in_flight),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<R: FetchRequest> Cacher<R> {
    pub fn new(config: Cache) -> Self {
        let store = moka::sync::Cache::builder()
            .max_capacity(config.capacity())
            .name(config.name().as_ref())
            .build();

        Cacher {
            config,
            store,
            in_flight: Default::default(),
            stats: Default::default(),
        }
    }

    /// Resolves `request` from the store, an in-flight fetch, or upstream.
    ///
    /// - A fresh entry is returned immediately.
    /// - If a fetch for the same key is pending, this attaches to it and
    ///   observes exactly its result, never a newer or older one.
    /// - Otherwise a new fetch is started. On success its result replaces
    ///   the store entry; on failure nothing is written and every attached
    ///   waiter receives the error.
    pub async fn fetch_cached(&self, request: R, options: FetchOptions) -> CacheContents<R::Item> {
        let key = request.cache_key();
        let max_age = options.max_age.unwrap_or(self.config.default_max_age());
        let name = self.config.name();
        metric!(counter("caches.access") += 1, "cache" => name.as_ref());

        if !options.force_refresh {
            if let Some(payload) = self.lookup(&key, max_age) {
                return Ok(payload);
            }
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.get(&key) {
                Some(pending) => {
                    tracing::trace!(cache = %name, %key, "attaching to in-flight fetch");
                    pending.clone()
                }
                None => {
                    // Another caller may have settled a fetch for this key
                    // between the lookup above and taking the lock.
                    if !options.force_refresh {
                        if let Some(payload) = self.lookup(&key, max_age) {
                            return Ok(payload);
                        }
                    }

                    let fetch = self.start_fetch(request, key.clone());
                    in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    fn lookup(&self, key: &CacheKey, max_age: Duration) -> Option<R::Item> {
        let entry = self.store.get(key)?;
        if !entry.is_fresh(max_age) {
            return None;
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        metric!(counter("caches.memory.hit") += 1, "cache" => self.config.name().as_ref());
        Some(entry.payload)
    }

    /// Spawns the upstream fetch and returns the shareable handle.
    ///
    /// The fetch is driven by the runtime so it runs to completion even when
    /// every waiter has gone away; the result still lands in the store for
    /// subsequent readers.
    fn start_fetch(&self, request: R, key: CacheKey) -> InFlight<R::Item> {
        let name = self.config.name();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        metric!(counter("caches.computation") += 1, "cache" => name.as_ref());
        tracing::debug!(cache = %name, %key, "starting upstream fetch");

        let store = self.store.clone();
        let stats = Arc::clone(&self.stats);
        let slot = ReleaseSlot {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        };

        let fetch = async move {
            // dropped when this block settles, before any waiter wakes
            let _slot = slot;

            let started = Instant::now();
            let result = request.fetch().await;
            metric!(timer("caches.fetch.duration") = started.elapsed(), "cache" => name.as_ref());

            match &result {
                Ok(payload) => {
                    store.insert(
                        key,
                        Entry {
                            payload: payload.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                    stats.mark_updated();
                }
                Err(error) => {
                    tracing::debug!(cache = %name, %key, %error, "upstream fetch failed");
                }
            }

            result
        }
        .boxed()
        .shared();

        tokio::spawn(fetch.clone());

        fetch
    }

    /// A point-in-time snapshot of this cache's counters. No side effects.
    pub fn status(&self) -> CacheStatus {
        // flush pending store maintenance so the entry count is exact
        self.store.run_pending_tasks();

        let request_count = self.stats.requests.load(Ordering::Relaxed);
        let hit_count = self.stats.hits.load(Ordering::Relaxed);
        let total = request_count + hit_count;
        let hit_rate = if total > 0 {
            hit_count as f64 / total as f64
        } else {
            0.0
        };

        CacheStatus {
            entry_count: self.store.entry_count(),
            last_update: self.stats.last_update(),
            request_count,
            hit_count,
            hit_rate,
        }
    }

    /// Drops every entry and resets the diagnostic counters.
    pub fn clear(&self) {
        self.store.invalidate_all();
        self.store.run_pending_tasks();
        self.stats.reset();
        tracing::debug!(cache = %self.config.name(), "cache cleared");
    }
}
