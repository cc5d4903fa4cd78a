//! Response caching for upstream payloads.
//!
//! Entries are keyed by the descriptor's cache key and expire after a TTL
//! resolved from the entry's category. Expired entries are never returned and
//! are purged lazily when touched; a background sweep can also be spawned to
//! bound memory.
//!
//! Entries live in a sharded map, so operations on unrelated keys do not share
//! a lock, and every insert replaces the whole entry.

use blox_core::ResourceCategory;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Maximum number of entries in the cache
    pub max_entries: usize,
    /// Per-category TTL overrides; categories not listed use their default TTL
    pub ttls: HashMap<ResourceCategory, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttls: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// TTL applied to entries of a category
    #[must_use]
    pub fn ttl_for(&self, category: ResourceCategory) -> Duration {
        self.ttls
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_ttl())
    }
}

/// A cached payload
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The cached payload
    value: Value,
    /// Category the payload belongs to
    category: ResourceCategory,
    /// When the entry was created
    created_at: Instant,
    /// TTL for this entry
    ttl: Duration,
    /// Number of times this entry has been returned
    hits: u64,
}

impl CacheEntry {
    fn new(value: Value, category: ResourceCategory, ttl: Duration) -> Self {
        Self {
            value,
            category,
            created_at: Instant::now(),
            ttl,
            hits: 0,
        }
    }

    /// An entry is dead from the instant its TTL has fully elapsed
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Current number of entries
    pub entries: usize,
    /// Number of evictions (expiry, capacity and invalidation)
    pub evictions: u64,
    /// Hit rate as a percentage
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate hit rate
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

enum Lookup {
    Hit(Value),
    Expired,
    Absent,
}

/// In-memory TTL cache for upstream payloads
pub struct ResponseCache {
    /// Cache configuration
    config: CacheConfig,
    /// The cache entries
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    /// Create a new response cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Create a disabled cache
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Check if caching is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// TTL applied to entries of a category
    #[must_use]
    pub fn ttl_for(&self, category: ResourceCategory) -> Duration {
        self.config.ttl_for(category)
    }

    /// Get a live cached payload
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        // The shard guard must be released before removing the expired entry
        let lookup = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                Lookup::Hit(entry.value.clone())
            }
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        };

        match lookup {
            Lookup::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Lookup::Expired => {
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss (expired)");
                None
            }
            Lookup::Absent => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Store a payload under the category's TTL
    pub fn put(&self, key: impl Into<String>, value: Value, category: ResourceCategory) {
        let ttl = self.config.ttl_for(category);
        self.put_with_ttl(key, value, category, ttl);
    }

    /// Store a payload with an explicit TTL
    pub fn put_with_ttl(
        &self,
        key: impl Into<String>,
        value: Value,
        category: ResourceCategory,
        ttl: Duration,
    ) {
        if !self.config.enabled || ttl.is_zero() || self.config.max_entries == 0 {
            return;
        }

        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict();
        }

        self.entries
            .insert(key.clone(), CacheEntry::new(value, category, ttl));

        debug!(
            key = %key,
            category = %category,
            ttl_secs = ttl.as_secs(),
            entries = self.entries.len(),
            "Response cached"
        );
    }

    /// Make room for one entry: expired entries first, then the least-hit ones
    fn evict(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed_expired = before - self.entries.len();

        let mut removed_cold = 0;
        if self.entries.len() >= self.config.max_entries {
            let to_remove = self.entries.len() - self.config.max_entries + 1;

            let mut hit_counts: Vec<(String, u64)> = self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.hits))
                .collect();
            hit_counts.sort_by_key(|(_, hits)| *hits);

            for (key, _) in hit_counts.into_iter().take(to_remove) {
                if self.entries.remove(&key).is_some() {
                    removed_cold += 1;
                }
            }
        }

        let removed = removed_expired + removed_cold;
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);

        if removed > 0 {
            info!(
                removed_expired,
                removed_total = removed,
                "Cache eviction completed"
            );
        }
    }

    /// Remove one key, returning whether it was present
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache entry invalidated");
        }
        removed
    }

    /// Remove every entry of a category, returning how many were removed
    pub fn invalidate_category(&self, category: ResourceCategory) -> usize {
        let removed = self.remove_where(|_, entry| entry.category == category);
        if removed > 0 {
            info!(category = %category, removed, "Category cache invalidated");
        }
        removed
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = self.remove_where(|key, _| key.starts_with(prefix));
        if removed > 0 {
            info!(prefix = %prefix, removed, "Cache entries invalidated by prefix");
        }
        removed
    }

    fn remove_where(&self, predicate: impl Fn(&str, &CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| !predicate(key, entry));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Clear all cache entries, returning how many were removed
    ///
    /// Cleared entries count as evictions.
    pub fn clear(&self) -> usize {
        let removed = self.remove_where(|_, _| true);
        info!(removed, "Cache cleared");
        removed
    }

    /// Remove expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.remove_where(|_, entry| entry.is_expired(now));
        if removed > 0 {
            debug!(removed, "Expired cache entries removed");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        stats.hit_rate = stats.hit_rate();
        stats
    }

    /// Periodically purge expired entries until `cancel` fires
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.cleanup_expired();
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
