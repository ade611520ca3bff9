//! In-memory TTL cache for aggregated fetch results.
//!
//! Entries are keyed by trade date plus a fingerprint of the config flags that
//! change the fetched data. Expiry is checked lazily on lookup; there is no
//! background sweep. Concurrent misses on the same key may both compute, and
//! the last write wins.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.base + *offset
    }
}

/// Cache key: trade date plus a fingerprint of the relevant config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub trade_date: NaiveDate,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(trade_date: NaiveDate, fingerprint: impl Into<String>) -> Self {
        Self {
            trade_date,
            fingerprint: fingerprint.into(),
        }
    }

    /// Build a key whose fingerprint is the BLAKE3 hash of `flags` serialized as JSON.
    pub fn from_flags<S: Serialize>(trade_date: NaiveDate, flags: &S) -> Self {
        // Plain data structs cannot fail to serialize; fall back to an empty payload.
        let json = serde_json::to_vec(flags).unwrap_or_default();
        Self::new(trade_date, blake3::hash(&json).to_hex().to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.fingerprint.get(..12).unwrap_or(&self.fingerprint);
        write!(f, "{}@{short}", self.trade_date.format("%Y%m%d"))
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

/// Whether the last `get_or_compute` call was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookup {
    Hit,
    Miss,
    Expired,
    Bypassed,
}

/// Memoizes expensive values for a bounded time-to-live.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Return the fresh entry for `key`, evicting it if it has expired.
    pub fn get(&self, key: &K, ttl: Duration) -> Option<Arc<V>> {
        self.lookup(key, ttl).0
    }

    fn lookup(&self, key: &K, ttl: Duration) -> (Option<Arc<V>>, Lookup) {
        let now = self.clock.now();
        let mut entries = self.lock();
        let fresh = match entries.get(key) {
            None => return (None, Lookup::Miss),
            Some(entry) => now.saturating_duration_since(entry.inserted_at) <= ttl,
        };
        if fresh {
            (entries.get(key).map(|e| Arc::clone(&e.value)), Lookup::Hit)
        } else {
            entries.remove(key);
            (None, Lookup::Expired)
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let entry = CacheEntry {
            value: Arc::clone(&value),
            inserted_at: self.clock.now(),
        };
        self.lock().insert(key, entry);
        value
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// With `bypass` set the lookup is skipped and the entry is always
    /// recomputed and overwritten. Errors from `compute` are returned and
    /// leave the cache untouched. The lock is not held while computing.
    /// Storing a new value also drops every other entry older than `ttl`.
    pub fn get_or_compute<E, F>(
        &self,
        key: &K,
        ttl: Duration,
        bypass: bool,
        compute: F,
    ) -> Result<(Arc<V>, Lookup), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let lookup = if bypass {
            Lookup::Bypassed
        } else {
            match self.lookup(key, ttl) {
                (Some(value), Lookup::Hit) => {
                    tracing::debug!(key = %key, "cache hit");
                    return Ok((value, Lookup::Hit));
                }
                (_, lookup) => lookup,
            }
        };

        tracing::debug!(key = %key, ?lookup, "cache recompute");
        let value = compute()?;
        let purged = self.purge_expired(ttl);
        if purged > 0 {
            tracing::debug!(purged, "expired cache entries dropped");
        }
        Ok((self.insert(key.clone(), value), lookup))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every entry older than `ttl`. Returns how many were removed.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.inserted_at) <= ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const TTL: Duration = Duration::from_secs(60);

    fn cache(clock: &Arc<ManualClock>) -> TtlCache<String, u32> {
        TtlCache::new(clock.clone())
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock);
        cache.insert("k".into(), 1);

        clock.advance(TTL);
        assert_eq!(cache.get(&"k".into(), TTL).as_deref(), Some(&1));

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&"k".into(), TTL).is_none());
        assert!(cache.is_empty(), "expired entry is evicted on lookup");
    }

    #[test]
    fn compute_error_is_not_stored() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock);
        let result: Result<_, &str> = cache.get_or_compute(&"k".into(), TTL, false, || Err("down"));
        assert_eq!(result.err(), Some("down"));
        assert!(cache.is_empty());
    }

    #[test]
    fn lookup_kind_is_reported() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock);
        let calls = Cell::new(0);
        let mut compute = || -> Result<u32, ()> {
            calls.set(calls.get() + 1);
            Ok(calls.get())
        };

        let (_, first) = cache.get_or_compute(&"k".into(), TTL, false, &mut compute).unwrap();
        let (_, second) = cache.get_or_compute(&"k".into(), TTL, false, &mut compute).unwrap();
        clock.advance(TTL * 2);
        let (_, third) = cache.get_or_compute(&"k".into(), TTL, false, &mut compute).unwrap();
        let (_, fourth) = cache.get_or_compute(&"k".into(), TTL, true, &mut compute).unwrap();

        assert_eq!(
            [first, second, third, fourth],
            [Lookup::Miss, Lookup::Hit, Lookup::Expired, Lookup::Bypassed]
        );
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn purge_and_invalidate() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock);
        cache.insert("old".into(), 1);
        clock.advance(TTL * 2);
        cache.insert("new".into(), 2);

        assert_eq!(cache.purge_expired(TTL), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&"new".into()));
        assert!(!cache.invalidate(&"new".into()));
    }

    #[test]
    fn recompute_drops_other_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock);
        let ok = |v: u32| move || Ok::<_, ()>(v);
        cache.get_or_compute(&"a".into(), TTL, false, ok(1)).unwrap();
        cache.get_or_compute(&"b".into(), TTL, false, ok(2)).unwrap();
        clock.advance(TTL + Duration::from_secs(1));

        cache.get_or_compute(&"c".into(), TTL, false, ok(3)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"c".into(), TTL).is_some());

        // A failed compute stores nothing and purges nothing.
        clock.advance(TTL + Duration::from_secs(1));
        let failed: Result<_, &str> = cache.get_or_compute(&"d".into(), TTL, false, || Err("down"));
        assert!(failed.is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn key_fingerprint_tracks_flags() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 19).unwrap();
        let a = CacheKey::from_flags(date, &("DCE", true));
        let b = CacheKey::from_flags(date, &("DCE", true));
        let c = CacheKey::from_flags(date, &("DCE", false));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string().starts_with("20240719@"));
    }
}
