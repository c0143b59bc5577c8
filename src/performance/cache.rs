//! TTL response cache with least-recently-accessed eviction

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;
use crate::config::CacheConfig;
use crate::error::{PerfError, PerfResult};
use super::lock;

/// A cached value with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// Position in the recency index; higher means more recently touched
    recency_tick: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Counters exposed for observability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate_percent: f64,
}

/// Estimated footprint of the cached values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMemoryUsage {
    pub total_entries: usize,
    pub estimated_bytes: u64,
    pub average_entry_bytes: f64,
}

/// Access-pattern summary over the live entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEfficiency {
    pub hit_rate_percent: f64,
    pub avg_access_count: f64,
    pub max_access_count: u64,
    pub avg_age_seconds: f64,
    pub oldest_entry_age_seconds: f64,
    pub utilization_percent: f64,
}

/// Operations the coordinator and host use on a cache.
///
/// Implemented by [`TtlCache`] and by [`DisabledCache`] when caching is off.
pub trait CacheStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> PerfResult<()>;
    fn delete(&self, key: &str) -> bool;
    fn clear(&self) -> usize;
    fn cleanup_expired(&self) -> usize;
    /// Drop the least recently accessed `fraction` of entries
    fn evict_fraction(&self, fraction: f64) -> usize;
    /// Release spare capacity held by the internal maps
    fn shrink(&self);
    fn len(&self) -> usize;
    fn get_stats(&self) -> CacheStats;
    fn is_enabled(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency_tick);
        Some(entry)
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self.entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_lru(&mut self, count: usize) -> usize {
        let victims: Vec<String> = self.recency
            .values()
            .take(count)
            .cloned()
            .collect();

        for key in &victims {
            self.remove(key);
        }
        self.evictions += victims.len() as u64;
        victims.len()
    }
}

/// Bounded key/value store with per-entry expiry.
///
/// Reads never fail: a missing or expired key is a miss. When a new key
/// arrives at capacity, expired entries are dropped first and then a batch of
/// the least recently accessed entries is evicted.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_size: usize,
    default_ttl: Duration,
    eviction_fraction: f64,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + 'static,
{
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new()),
            max_size: max_size.max(1),
            default_ttl,
            eviction_fraction: 0.1,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.default_ttl())
            .with_eviction_fraction(config.eviction_fraction)
    }

    /// Share of capacity evicted in one batch when the cache is full
    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn eviction_batch(&self) -> usize {
        ((self.max_size as f64 * self.eviction_fraction) as usize).max(1)
    }

    /// Get a value, or `None` if absent or expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = lock(&self.inner);

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let tick = inner.tick();
        let CacheInner { entries, recency, .. } = &mut *inner;
        let entry = entries.get_mut(key)?;
        recency.remove(&entry.recency_tick);
        recency.insert(tick, key.to_string());
        entry.recency_tick = tick;
        entry.access_count += 1;
        entry.last_accessed = now;
        let value = entry.value.clone();

        inner.hits += 1;
        Some(value)
    }

    /// Get a value or fall back to `default`
    pub fn get_or(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Insert or overwrite a value. `ttl` defaults to the configured TTL and must be non-zero.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> PerfResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(PerfError::invalid_argument("ttl", "TTL must be a positive duration"));
        }

        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| PerfError::invalid_argument("ttl", "TTL is too large to schedule an expiry"))?;
        let mut inner = lock(&self.inner);

        if let Some(old) = inner.remove(key) {
            // Overwrites keep their original access history
            let tick = inner.tick();
            inner.recency.insert(tick, key.to_string());
            inner.entries.insert(key.to_string(), CacheEntry {
                key: key.to_string(),
                value,
                created_at: now,
                expires_at,
                access_count: old.access_count,
                last_accessed: now,
                recency_tick: tick,
            });
            return Ok(());
        }

        if inner.entries.len() >= self.max_size {
            let expired = inner.remove_expired(now);
            if inner.entries.len() >= self.max_size {
                let overflow = inner.entries.len() + 1 - self.max_size;
                let evicted = inner.evict_lru(self.eviction_batch().max(overflow));
                debug!(expired, evicted, max_size = self.max_size, "Cache full, evicted entries");
            }
        }

        let tick = inner.tick();
        inner.recency.insert(tick, key.to_string());
        inner.entries.insert(key.to_string(), CacheEntry {
            key: key.to_string(),
            value,
            created_at: now,
            expires_at,
            access_count: 0,
            last_accessed: now,
            recency_tick: tick,
        });

        Ok(())
    }

    /// Remove an entry; returns whether anything was removed
    pub fn delete(&self, key: &str) -> bool {
        lock(&self.inner).remove(key).is_some()
    }

    /// Remove everything; returns the number of entries dropped
    pub fn clear(&self) -> usize {
        let mut inner = lock(&self.inner);
        let count = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        count
    }

    /// Sweep all expired entries; returns the number removed
    pub fn cleanup_expired(&self) -> usize {
        let removed = lock(&self.inner).remove_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "Removed expired cache entries");
        }
        removed
    }

    /// Evict the least recently accessed `fraction` of the live entries
    pub fn evict_fraction(&self, fraction: f64) -> usize {
        let mut inner = lock(&self.inner);
        let fraction = fraction.clamp(0.0, 1.0);
        let count = (inner.entries.len() as f64 * fraction).ceil() as usize;
        inner.evict_lru(count)
    }

    pub fn shrink(&self) {
        let mut inner = lock(&self.inner);
        inner.entries.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        lock(&self.inner)
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Snapshot of an entry's bookkeeping without counting as an access
    pub fn peek_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        lock(&self.inner).entries.get(key).cloned()
    }

    /// Insert many entries with the same TTL
    pub fn preload<I>(&self, entries: I, ttl: Option<Duration>) -> PerfResult<usize>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut loaded = 0;
        for (key, value) in entries {
            self.set(&key, value, ttl)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get_stats(&self) -> CacheStats {
        let inner = lock(&self.inner);
        let total_requests = inner.hits + inner.misses;
        let hit_rate_percent = if total_requests == 0 {
            0.0
        } else {
            inner.hits as f64 / total_requests as f64 * 100.0
        };

        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            total_requests,
            size: inner.entries.len(),
            max_size: self.max_size,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate_percent,
        }
    }

    /// Analyse access counts and ages of live entries. `None` when empty.
    pub fn efficiency(&self) -> Option<CacheEfficiency> {
        let hit_rate_percent = self.get_stats().hit_rate_percent;
        let now = Instant::now();
        let inner = lock(&self.inner);
        if inner.entries.is_empty() {
            return None;
        }

        let count = inner.entries.len() as f64;
        let mut total_access = 0u64;
        let mut max_access = 0u64;
        let mut total_age = 0.0;
        let mut oldest_age = 0.0f64;

        for entry in inner.entries.values() {
            total_access += entry.access_count;
            max_access = max_access.max(entry.access_count);
            let age = now.saturating_duration_since(entry.created_at).as_secs_f64();
            total_age += age;
            oldest_age = oldest_age.max(age);
        }

        Some(CacheEfficiency {
            hit_rate_percent,
            avg_access_count: total_access as f64 / count,
            max_access_count: max_access,
            avg_age_seconds: total_age / count,
            oldest_entry_age_seconds: oldest_age,
            utilization_percent: count / self.max_size as f64 * 100.0,
        })
    }

    /// Cache a model response under a key derived from the request parameters
    pub fn cache_response(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
        response: V,
        ttl: Option<Duration>,
    ) -> PerfResult<()> {
        let key = response_key(prompt, model, temperature, max_tokens);
        self.set(&key, response, ttl)
    }

    pub fn get_cached_response(
        &self,
        prompt: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Option<V> {
        self.get(&response_key(prompt, model, temperature, max_tokens))
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Serialize + 'static,
{
    /// Estimate memory held by keys and serialized values
    pub fn memory_usage(&self) -> CacheMemoryUsage {
        let inner = lock(&self.inner);
        let total_entries = inner.entries.len();
        let estimated_bytes: u64 = inner.entries
            .values()
            .map(|entry| {
                let value_len = serde_json::to_vec(&entry.value).map(|v| v.len()).unwrap_or(0);
                (entry.key.len() + value_len) as u64
            })
            .sum();

        CacheMemoryUsage {
            total_entries,
            estimated_bytes,
            average_entry_bytes: if total_entries == 0 {
                0.0
            } else {
                estimated_bytes as f64 / total_entries as f64
            },
        }
    }
}

impl<V> CacheStore<V> for TtlCache<V>
where
    V: Clone + Send + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        TtlCache::get(self, key)
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> PerfResult<()> {
        TtlCache::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> bool {
        TtlCache::delete(self, key)
    }

    fn clear(&self) -> usize {
        TtlCache::clear(self)
    }

    fn cleanup_expired(&self) -> usize {
        TtlCache::cleanup_expired(self)
    }

    fn evict_fraction(&self, fraction: f64) -> usize {
        TtlCache::evict_fraction(self, fraction)
    }

    fn shrink(&self) {
        TtlCache::shrink(self)
    }

    fn len(&self) -> usize {
        TtlCache::len(self)
    }

    fn get_stats(&self) -> CacheStats {
        TtlCache::get_stats(self)
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stand-in used when caching is disabled: every read misses, writes are dropped
#[derive(Debug, Default)]
pub struct DisabledCache {
    misses: AtomicU64,
}

impl DisabledCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V> CacheStore<V> for DisabledCache {
    fn get(&self, _key: &str) -> Option<V> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, _key: &str, _value: V, _ttl: Option<Duration>) -> PerfResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) -> usize {
        0
    }

    fn cleanup_expired(&self) -> usize {
        0
    }

    fn evict_fraction(&self, _fraction: f64) -> usize {
        0
    }

    fn shrink(&self) {}

    fn len(&self) -> usize {
        0
    }

    fn get_stats(&self) -> CacheStats {
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            misses,
            total_requests: misses,
            ..CacheStats::default()
        }
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Deterministic cache key for a model request
pub fn response_key(prompt: &str, model: &str, temperature: f64, max_tokens: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", prompt, model, temperature, max_tokens).as_bytes());
    format!("ai_response:{}", hex::encode(hasher.finalize()))
}
