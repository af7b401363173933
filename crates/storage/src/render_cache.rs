//! In-memory cache of encoded renders with single-flight coalescing.
//!
//! Entries are keyed by request fingerprint and expire `ttl` after
//! insertion. Reads use `peek`, so recency never changes eviction order:
//! when the cache is full the oldest insertion is evicted first.
//!
//! ## Single-flight
//!
//! [`RenderCache::lookup_or_begin`] checks the data map and the in-flight
//! map under one lock, so two callers can never both observe a miss and
//! both start rendering. The first caller gets a [`FlightGuard`]; later
//! callers subscribe to its broadcast. Completing the guard stores a
//! success and wakes the waiters in the same critical section that clears
//! the in-flight entry. Dropping a guard without completing it (timeout,
//! cancellation, panic) clears the entry and tells waiters to retry.

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

use map_common::{Fingerprint, ImageFormat, MapError, MapResult};

/// Encoded image plus the metadata needed to answer a request from cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRender {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub feature_count: usize,
    pub render_time_ms: u64,
}

struct CacheEntry {
    value: CachedRender,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// What an in-flight leader hands to its waiters.
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    Done(Result<CachedRender, MapError>),
    /// The leader went away without a result; look up again.
    Abandoned,
}

/// Result of [`RenderCache::lookup_or_begin`].
pub enum Lookup {
    Hit(CachedRender),
    /// Caller must render and complete the guard.
    Leader(FlightGuard),
    /// Another caller is rendering the same fingerprint.
    Follower(FlightWaiter),
}

struct Inner {
    entries: LruCache<Fingerprint, CacheEntry>,
    in_flight: HashMap<Fingerprint, broadcast::Sender<FlightOutcome>>,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RenderCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that waited on another caller's render.
    pub coalesced: u64,
    pub evictions: u64,
    pub expired: u64,
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
}

impl RenderCacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub struct RenderCache {
    inner: Mutex<Inner>,
    capacity: NonZeroUsize,
    ttl: Duration,
    counters: CacheCounters,
}

impl RenderCache {
    /// Cache holding at most `capacity` renders for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            capacity,
            ttl,
            counters: CacheCounters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plain lookup. Expired entries are removed and count as misses.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CachedRender> {
        let mut inner = self.lock();
        let found = self.peek_live(&mut inner, fingerprint);
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store with the default TTL.
    pub fn put(&self, fingerprint: Fingerprint, value: CachedRender) {
        self.put_with_ttl(fingerprint, value, self.ttl);
    }

    pub fn put_with_ttl(&self, fingerprint: Fingerprint, value: CachedRender, ttl: Duration) {
        let mut inner = self.lock();
        self.insert_locked(&mut inner, fingerprint, value, ttl);
    }

    /// Atomic get-or-begin-compute.
    pub fn lookup_or_begin(self: &Arc<Self>, fingerprint: &Fingerprint) -> Lookup {
        let mut inner = self.lock();

        if let Some(value) = self.peek_live(&mut inner, fingerprint) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(value);
        }

        if let Some(sender) = inner.in_flight.get(fingerprint) {
            let receiver = sender.subscribe();
            let coalesced = self.counters.coalesced.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                fingerprint = %fingerprint,
                coalesced = coalesced,
                "Coalescing request onto in-flight render"
            );
            return Lookup::Follower(FlightWaiter { receiver });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        // One message per flight, so capacity 1 never lags.
        let (sender, _) = broadcast::channel(1);
        inner.in_flight.insert(fingerprint.clone(), sender.clone());
        debug!(
            fingerprint = %fingerprint,
            in_flight = inner.in_flight.len(),
            "Starting render"
        );
        Lookup::Leader(FlightGuard {
            cache: Arc::clone(self),
            fingerprint: fingerprint.clone(),
            sender,
            finished: false,
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        if !expired.is_empty() {
            self.counters
                .expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            info!(
                purged = expired.len(),
                remaining = inner.entries.len(),
                "Purged expired renders"
            );
        }
        expired.len()
    }

    pub fn stats(&self) -> RenderCacheStats {
        let inner = self.lock();
        RenderCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
            capacity: self.capacity.get(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock()
            .entries
            .peek(fingerprint)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove all entries. In-flight renders are unaffected.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn peek_live(&self, inner: &mut Inner, fingerprint: &Fingerprint) -> Option<CachedRender> {
        let expired = match inner.entries.peek(fingerprint) {
            None => return None,
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
        };
        if expired {
            inner.entries.pop(fingerprint);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn insert_locked(
        &self,
        inner: &mut Inner,
        fingerprint: Fingerprint,
        value: CachedRender,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        if let Some((evicted, _)) = inner.entries.push(fingerprint.clone(), entry) {
            if evicted != fingerprint {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %evicted, "Evicted oldest render");
            }
        }
    }

    fn finish_flight(&self, fingerprint: &Fingerprint, outcome: FlightOutcome) {
        let mut inner = self.lock();
        if let FlightOutcome::Done(Ok(value)) = &outcome {
            self.insert_locked(&mut inner, fingerprint.clone(), value.clone(), self.ttl);
        }
        if let Some(sender) = inner.in_flight.remove(fingerprint) {
            let waiters = sender.receiver_count();
            // No receivers is fine: nobody coalesced onto this render.
            let _ = sender.send(outcome);
            if waiters > 0 {
                debug!(
                    fingerprint = %fingerprint,
                    waiters = waiters,
                    "Shared render result with coalesced waiters"
                );
            }
        }
    }
}

/// Held by the one caller rendering a fingerprint.
pub struct FlightGuard {
    cache: Arc<RenderCache>,
    fingerprint: Fingerprint,
    sender: broadcast::Sender<FlightOutcome>,
    finished: bool,
}

impl FlightGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Number of callers currently waiting on this render.
    pub fn waiters(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish the result. Successes are cached; failures are only shared.
    pub fn complete(mut self, result: MapResult<CachedRender>) {
        self.finished = true;
        self.cache
            .finish_flight(&self.fingerprint, FlightOutcome::Done(result));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(fingerprint = %self.fingerprint, "Render abandoned; releasing waiters");
            self.cache
                .finish_flight(&self.fingerprint, FlightOutcome::Abandoned);
        }
    }
}

/// Held by callers coalesced onto another caller's render.
pub struct FlightWaiter {
    receiver: broadcast::Receiver<FlightOutcome>,
}

impl FlightWaiter {
    pub async fn wait(mut self) -> FlightOutcome {
        self.receiver
            .recv()
            .await
            .unwrap_or(FlightOutcome::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_hex(format!("{:02x}", n).repeat(32)).unwrap()
    }

    fn render(tag: &'static str) -> CachedRender {
        CachedRender {
            bytes: Bytes::from(tag),
            format: ImageFormat::Png,
            width: 1,
            height: 1,
            feature_count: 0,
            render_time_ms: 1,
        }
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = RenderCache::new(10, Duration::from_secs(60));
        assert!(cache.is_empty());
        assert!(cache.get(&fp(1)).is_none());

        cache.put(fp(1), render("one"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp(1)).unwrap().bytes, Bytes::from("one"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let cache = RenderCache::new(3, Duration::from_secs(60));
        for i in 0..3 {
            cache.put(fp(i), render("x"));
        }
        // Reads must not change eviction order
        assert!(cache.get(&fp(0)).is_some());

        cache.put(fp(3), render("x"));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&fp(0)));
        assert!(cache.contains(&fp(1)));
        assert!(cache.contains(&fp(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_entry_is_not_an_eviction() {
        let cache = RenderCache::new(2, Duration::from_secs(60));
        cache.put(fp(1), render("a"));
        cache.put(fp(1), render("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&fp(1)).unwrap().bytes, Bytes::from("b"));
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = RenderCache::new(10, Duration::from_secs(60));
        cache.put_with_ttl(fp(1), render("a"), Duration::from_millis(50));
        assert!(cache.get(&fp(1)).is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get(&fp(1)).is_none());
        let stats = cache.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = RenderCache::new(10, Duration::from_millis(30));
        cache.put(fp(1), render("a"));
        cache.put(fp(2), render("b"));
        cache.put_with_ttl(fp(3), render("c"), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&fp(3)));
    }

    #[tokio::test]
    async fn test_leader_completion_wakes_followers() {
        let cache = Arc::new(RenderCache::new(10, Duration::from_secs(60)));

        let Lookup::Leader(guard) = cache.lookup_or_begin(&fp(1)) else {
            panic!("first lookup must lead");
        };
        let Lookup::Follower(waiter) = cache.lookup_or_begin(&fp(1)) else {
            panic!("second lookup must follow");
        };
        assert_eq!(guard.waiters(), 1);

        guard.complete(Ok(render("done")));
        match waiter.wait().await {
            FlightOutcome::Done(Ok(value)) => assert_eq!(value.bytes, Bytes::from("done")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(matches!(cache.lookup_or_begin(&fp(1)), Lookup::Hit(_)));
        let stats = cache.stats();
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_but_not_cached() {
        let cache = Arc::new(RenderCache::new(10, Duration::from_secs(60)));
        let Lookup::Leader(guard) = cache.lookup_or_begin(&fp(2)) else {
            panic!("first lookup must lead");
        };
        let Lookup::Follower(waiter) = cache.lookup_or_begin(&fp(2)) else {
            panic!("second lookup must follow");
        };

        guard.complete(Err(MapError::Encode("boom".into())));
        assert!(matches!(
            waiter.wait().await,
            FlightOutcome::Done(Err(MapError::Encode(_)))
        ));
        assert!(cache.is_empty());
        assert!(matches!(cache.lookup_or_begin(&fp(2)), Lookup::Leader(_)));
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_waiters() {
        let cache = Arc::new(RenderCache::new(10, Duration::from_secs(60)));
        let Lookup::Leader(guard) = cache.lookup_or_begin(&fp(3)) else {
            panic!("first lookup must lead");
        };
        let Lookup::Follower(waiter) = cache.lookup_or_begin(&fp(3)) else {
            panic!("second lookup must follow");
        };

        drop(guard);
        assert!(matches!(waiter.wait().await, FlightOutcome::Abandoned));
        assert_eq!(cache.stats().in_flight, 0);
        // The next caller leads instead of blocking forever
        assert!(matches!(cache.lookup_or_begin(&fp(3)), Lookup::Leader(_)));
    }
}
