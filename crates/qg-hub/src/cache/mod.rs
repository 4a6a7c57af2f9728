//! # Result Cache
//!
//! TTL cache of real-time query results keyed by enterprise and normalized
//! query text. Entries are `Arc`s replaced whole under a write lock, so a
//! reader sees either the old rows or the new rows, never a mix.
//!
//! Expired entries are dropped lazily on `get` and in bulk by the sweeper
//! task started with [`spawn_sweeper`].

pub mod coalesce;

use async_trait::async_trait;
use qg_core::Row;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Exact cache key. Two queries share a key only when their normalized text
/// and enterprise are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// `sql_cache:<enterprise len>:<enterprise>:<normalized query>`. The length
    /// prefix keeps enterprises containing `:` from colliding.
    pub fn new(enterprise: &str, query: &str) -> Self {
        Self(format!(
            "sql_cache:{}:{}:{}",
            enterprise.len(),
            enterprise,
            qg_core::sql::normalize(query)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage seam. The in-memory backend ships here; a remote store can
/// implement the same trait.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>>;
    async fn put(&self, key: CacheKey, rows: Arc<Vec<Row>>, ttl: Duration);
    /// Remove expired entries, returning how many went.
    async fn purge_expired(&self) -> usize;
    async fn len(&self) -> usize;
}

#[derive(Debug)]
struct CacheEntry {
    rows: Arc<Vec<Row>>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.rows.clone()),
                Some(_) => {}
            }
        }

        // Expired: a put may have replaced it since the read lock was released
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    async fn put(&self, key: CacheKey, rows: Arc<Vec<Row>>, ttl: Duration) {
        let entry = Arc::new(CacheEntry {
            rows,
            inserted_at: Instant::now(),
            ttl,
        });
        self.entries.write().await.insert(key, entry);
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub ttl_secs: u64,
}

pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), ttl)
    }

    pub fn key(&self, enterprise: &str, query: &str) -> CacheKey {
        CacheKey::new(enterprise, query)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>> {
        let found = self.backend.get(key).await;
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Lookup that leaves the hit/miss counters alone.
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<Vec<Row>>> {
        self.backend.get(key).await
    }

    /// Store with the configured TTL. Last put wins.
    pub async fn put(&self, key: CacheKey, rows: Arc<Vec<Row>>) {
        self.put_with_ttl(key, rows, self.ttl).await;
    }

    pub async fn put_with_ttl(&self, key: CacheKey, rows: Arc<Vec<Row>>, ttl: Duration) {
        self.backend.put(key, rows, ttl).await;
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn purge_expired(&self) -> usize {
        self.backend.purge_expired().await
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.backend.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            ttl_secs: self.ttl().as_secs(),
        }
    }
}

/// Purge expired entries every `every`. Runs until the runtime shuts down.
pub fn spawn_sweeper(cache: Arc<ResultCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Swept expired cache entries");
            }
        }
    })
}
