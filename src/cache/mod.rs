//! Expiring key-value cache for slow-changing facts.
//!
//! Collectors use this to avoid re-querying facts that almost never change
//! (device names, core counts, mount tables) on every tick. Entries carry a
//! per-key time-to-live resolved from a class table: keys under `device.`
//! keep their value for five minutes, keys under `mount.` for one minute,
//! and everything else for five seconds by default.
//!
//! Expiry is lazy: an expired entry is simply ignored on lookup. A sweep
//! runs opportunistically when the map grows past a bound, and can also be
//! invoked explicitly.
//!
//! The cache is safe for concurrent readers and writers; entries are guarded
//! by a single `RwLock` and values are returned by clone, so a caller never
//! observes a torn entry.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use darwin_sampler::cache::Cache;
//!
//! let cache: Cache<String> = Cache::with_default_ttl(Duration::from_secs(60));
//! cache.put("device.gpu.name", "Apple M2".to_string());
//!
//! assert_eq!(cache.get("device.gpu.name").as_deref(), Some("Apple M2"));
//! assert!(cache.get("device.cpu.name").is_none());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;

/// Sweep opportunistically once the map holds more entries than this.
const SWEEP_THRESHOLD: usize = 100;

/// Default TTL classes: key-prefix to lifetime.
static DEFAULT_TTL_CLASSES: Lazy<Vec<(&'static str, Duration)>> = Lazy::new(|| {
    vec![("device.", Duration::from_secs(300)), ("mount.", Duration::from_secs(60))]
});

/// Resolves the time-to-live for a key from its prefix class, falling back
/// to a default lifetime when no class matches.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    classes: Vec<(String, Duration)>,
}

impl TtlPolicy {
    /// Policy with the given default and no prefix classes.
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl, classes: Vec::new() }
    }

    /// Adds a prefix class. Earlier classes win when prefixes overlap.
    pub fn with_class(mut self, prefix: impl Into<String>, ttl: Duration) -> Self {
        self.classes.push((prefix.into(), ttl));
        self
    }

    pub fn resolve(&self, key: &str) -> Duration {
        self.classes
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    /// The standard class table: 5 minutes for `device.` keys, 60 seconds
    /// for `mount.` keys, 5 seconds otherwise.
    fn default() -> Self {
        let mut policy = Self::new(Duration::from_secs(5));
        for (prefix, ttl) in DEFAULT_TTL_CLASSES.iter() {
            policy = policy.with_class(*prefix, *ttl);
        }
        policy
    }
}

/// Hit/miss/occupancy counters, readable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// String-keyed cache with per-entry expiry.
pub struct Cache<V: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    policy: TtlPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> Cache<V> {
    /// Cache using the given TTL policy.
    pub fn new(policy: TtlPolicy) -> Self {
        Self { entries: RwLock::new(HashMap::new()), policy, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    /// Cache with one uniform TTL and no prefix classes.
    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self::new(TtlPolicy::new(ttl))
    }

    /// Returns the value for `key` if present and unexpired. An expired
    /// entry is left in place for a later sweep.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            },
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    /// Inserts or overwrites `key` with a TTL resolved from the policy.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let ttl = self.policy.resolve(&key);
        self.put_with_ttl(key, value, ttl);
    }

    /// Inserts or overwrites `key` with an explicit TTL.
    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.insert(key.into(), CacheEntry::new(value, ttl));
        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired());
        }
    }

    /// True only if `key` is present and unexpired. Does not count as a
    /// hit or miss.
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read();
        entries.get(key).map(|entry| !entry.is_expired()).unwrap_or(false)
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drops all entries. Statistics are retained.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Removes every expired entry.
    pub fn sweep_expired(&self) {
        self.entries.write().retain(|_, entry| !entry.is_expired());
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
