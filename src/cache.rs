//! Memoisation of expensive pipeline steps.
//!
//! [`CacheManager`] is the only state shared across conversion requests.
//! Construct one per process, hand it to the orchestrator as an
//! `Arc<CacheManager>`, and call [`CacheManager::shutdown`] when done.
//!
//! Entries are keyed by a SHA-256 digest of the payload combined with a
//! digest of the serialised options, and expire after an operation-specific
//! TTL. Expiry is checked lazily on every lookup and eagerly by a background
//! sweep. When the table is full the oldest insertion is evicted first.
//!
//! # Thread Safety
//!
//! The entry table sits behind a `parking_lot::Mutex` that is never held
//! across an `.await`; counters are atomics.

use crate::config::{CacheConfig, ComplexityThresholds};
use crate::routing::{ComplexityScore, ContentUnit};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// A stored value with its lifetime.
#[derive(Clone)]
pub struct CacheEntry {
    pub key: String,
    value: Arc<dyn Any + Send + Sync>,
    pub created_at: Instant,
    pub expire_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expire_at
    }
}

/// Bounded table with insertion-order eviction.
struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    max_size: usize,
}

impl MemoryCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<Arc<dyn Any + Send + Sync>> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| Arc::clone(&e.value))
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        while self.entries.len() >= self.max_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

struct Shared {
    store: Mutex<MemoryCache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters and occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub hit_count: u64,
    pub miss_count: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub hit_rate: f64,
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub max_size: usize,
}

/// Process-wide memoisation service.
pub struct CacheManager {
    config: CacheConfig,
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

impl CacheManager {
    /// Create a cache. When enabled and called inside a tokio runtime, a
    /// background task purges expired entries every `sweep_interval`.
    pub fn new(config: CacheConfig) -> Self {
        let shared = Arc::new(Shared {
            store: Mutex::new(MemoryCache::new(config.max_size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });
        let sweeper = if config.enabled {
            spawn_sweeper(Arc::downgrade(&shared), config.sweep_interval)
        } else {
            None
        };
        Self {
            config,
            shared,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.shared.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`. An expired entry is removed and reported as absent.
    ///
    /// Counts a hit or a miss. A stored value of another type is a miss.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let found = self.shared.store.lock().get(key, Instant::now());
        match found.and_then(|v| v.downcast_ref::<T>().cloned()) {
            Some(v) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (the configured default when None).
    pub fn set<T>(&self, key: impl Into<String>, value: T, ttl: Option<Duration>)
    where
        T: Send + Sync + 'static,
    {
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.into(),
            value: Arc::new(value),
            created_at: now,
            expire_at: now + ttl.unwrap_or(self.config.ttl),
        };
        self.shared.store.lock().insert(entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.shared.store.lock().remove(key)
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        self.shared.store.lock().clear();
        self.shared.hits.store(0, Ordering::Relaxed);
        self.shared.misses.store(0, Ordering::Relaxed);
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.shared.store.lock().purge_expired(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (total, expired) = {
            let store = self.shared.store.lock();
            let expired = store.entries.values().filter(|e| e.is_expired(now)).count();
            (store.entries.len(), expired)
        };
        let hit_count = self.shared.hits.load(Ordering::Relaxed);
        let miss_count = self.shared.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;
        CacheStats {
            enabled: self.config.enabled,
            hit_count,
            miss_count,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hit_count as f64 / lookups as f64
            },
            total,
            valid: total - expired,
            expired,
            max_size: self.config.max_size,
        }
    }

    /// Stop the background sweep and drop every entry.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.clear();
    }

    // ── Memoising wrappers ──────────────────────────────────────────────

    /// Memoise a PDF parse keyed by the document bytes and parse options.
    pub async fn cache_pdf_parsing<T, E, O, F, Fut>(
        &self,
        pdf: &[u8],
        options: &O,
        compute: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        O: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.memoize(
            "PDF parsing",
            || format!("pdf_{}_{}", digest(pdf), digest_json(options)),
            self.config.pdf_ttl,
            compute,
        )
        .await
    }

    /// Memoise page rasterisation keyed by bytes, page list and render options.
    pub async fn cache_image_rendering<T, E, O, F, Fut>(
        &self,
        pdf: &[u8],
        pages: &[usize],
        options: &O,
        compute: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        O: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.memoize(
            "image rendering",
            || {
                format!(
                    "img_{}_{}_{}",
                    digest(pdf),
                    digest_json(pages),
                    digest_json(options)
                )
            },
            self.config.image_ttl,
            compute,
        )
        .await
    }

    /// Memoise a model call keyed by prompt, model id and call options.
    pub async fn cache_llm_call<T, E, O, F, Fut>(
        &self,
        prompt: &str,
        model: &str,
        options: &O,
        compute: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        O: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.memoize(
            "LLM call",
            || {
                format!(
                    "llm_{}_{}_{}",
                    digest(prompt.as_bytes()),
                    digest(model.as_bytes()),
                    digest_json(options)
                )
            },
            self.config.llm_ttl,
            compute,
        )
        .await
    }

    /// Memoise a complexity analysis. Synchronous and infallible.
    pub fn cache_complexity_analysis<F>(
        &self,
        unit: &ContentUnit,
        thresholds: &ComplexityThresholds,
        compute: F,
    ) -> ComplexityScore
    where
        F: FnOnce() -> ComplexityScore,
    {
        if !self.config.enabled {
            return compute();
        }
        let key = format!(
            "complexity_{}_{}",
            digest_json(unit),
            digest_json(thresholds)
        );
        if let Some(score) = self.get::<ComplexityScore>(&key) {
            return score;
        }
        let score = compute();
        self.set(key, score.clone(), Some(self.config.complexity_ttl));
        score
    }

    async fn memoize<T, E, K, F, Fut>(
        &self,
        what: &str,
        key: K,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        K: FnOnce() -> String,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return compute().await;
        }
        let key = key();
        if let Some(hit) = self.get::<T>(&key) {
            debug!("Cache hit for {}", what);
            return Ok(hit);
        }
        debug!("Cache miss for {}", what);
        let value = compute().await?;
        self.set(key, value.clone(), Some(ttl));
        Ok(value)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

fn spawn_sweeper(shared: Weak<Shared>, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let purged = shared.store.lock().purge_expired(Instant::now());
            if purged > 0 {
                debug!("Cache sweep removed {} expired entries", purged);
            }
        }
    }))
}

/// Hex SHA-256 of `data`.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn digest_json<O: Serialize + ?Sized>(value: &O) -> String {
    // Serialising plain data structs cannot fail; an error only changes the key.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    digest(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn enabled(max_size: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_size,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn get_after_set_until_ttl_elapses() {
        let cache = CacheManager::new(enabled(10));
        cache.set("k", 42u32, Some(Duration::from_secs(60)));
        assert_eq!(cache.get::<u32>("k"), Some(42));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get::<u32>("k"), Some(42));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.get::<u32>("never-set"), None);
        // Lazy eviction removed the expired entry.
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_purges_expired_entries() {
        let cache = CacheManager::new(CacheConfig {
            sweep_interval: Duration::from_secs(10),
            ..enabled(10)
        });
        cache.set("a", 1u8, Some(Duration::from_secs(5)));
        cache.set("b", 2u8, Some(Duration::from_secs(500)));
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u8>("b"), Some(2));
        cache.shutdown();
    }

    #[test]
    fn oldest_insertion_is_evicted_first() {
        let cache = CacheManager::new(enabled(2));
        cache.set("a", 1u8, None);
        cache.set("b", 2u8, None);
        // Reading "a" does not refresh it.
        assert_eq!(cache.get::<u8>("a"), Some(1));
        cache.set("c", 3u8, None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<u8>("a"), None);
        assert_eq!(cache.get::<u8>("b"), Some(2));
        assert_eq!(cache.get::<u8>("c"), Some(3));
    }

    #[test]
    fn overwriting_a_key_does_not_evict_others() {
        let cache = CacheManager::new(enabled(2));
        cache.set("a", 1u8, None);
        cache.set("b", 2u8, None);
        cache.set("b", 20u8, None);
        assert_eq!(cache.get::<u8>("a"), Some(1));
        assert_eq!(cache.get::<u8>("b"), Some(20));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = CacheManager::new(enabled(10));
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.set("k", "v".to_string(), None);
        let _ = cache.get::<String>("k");
        let _ = cache.get::<String>("k");
        let _ = cache.get::<String>("missing");
        let _ = cache.get::<u64>("k");
        let stats = cache.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.valid, 1);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.hit_count, 0);
    }

    #[tokio::test]
    async fn wrapper_computes_once_per_key() {
        let cache = CacheManager::new(enabled(10));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let out: Result<String, ()> = cache
                .cache_llm_call("prompt", "model-a", &("TB", 60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("graph TB".to_string())
                })
                .await;
            assert_eq!(out.unwrap(), "graph TB");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Different options, different key.
        let _: Result<String, ()> = cache
            .cache_llm_call("prompt", "model-a", &("LR", 60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("graph LR".to_string())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        cache.shutdown();
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = CacheManager::new(enabled(10));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let out: Result<Vec<u8>, String> = cache
                .cache_pdf_parsing(b"%PDF-1.7", &"opts", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("corrupt".to_string())
                })
                .await;
            assert!(out.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        cache.shutdown();
    }

    #[tokio::test]
    async fn disabled_cache_always_computes_and_stores_nothing() {
        let cache = CacheManager::disabled();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: Result<u32, ()> = cache
                .cache_image_rendering(b"pdf", &[1, 2], &"png", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert!(!stats.enabled);
        assert_eq!(stats.hit_count + stats.miss_count, 0);
    }

    #[test]
    fn complexity_analysis_is_memoised() {
        let cache = CacheManager::new(enabled(10));
        let unit = ContentUnit::new("| a |\n| b |", 1, 1000.0);
        let thresholds = ComplexityThresholds::default();
        let analyzer = crate::routing::ComplexityAnalyzer::new(thresholds.clone());
        let calls = AtomicUsize::new(0);
        let mut scores = Vec::new();
        for _ in 0..2 {
            scores.push(cache.cache_complexity_analysis(&unit, &thresholds, || {
                calls.fetch_add(1, Ordering::SeqCst);
                analyzer.analyze(&unit)
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scores[0], scores[1]);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = digest(b"Hello, World!");
        assert_eq!(d.len(), 64);
        assert_eq!(d, digest(b"Hello, World!"));
        assert_ne!(d, digest(b"hello, world!"));
    }

    #[tokio::test]
    async fn concurrent_writers_keep_table_bounded() {
        let cache = Arc::new(CacheManager::new(enabled(16)));
        let mut tasks = Vec::new();
        for t in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                for i in 0..100 {
                    cache.set(format!("{t}-{i}"), i, None);
                    let _ = cache.get::<i32>(&format!("{t}-{}", i / 2));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(cache.len() <= 16);
        cache.shutdown();
    }
}
