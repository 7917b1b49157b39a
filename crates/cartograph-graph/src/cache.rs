//! Time-boxed, capacity-bounded cache of built graphs.
//!
//! [`GraphCache`] owns the policy (TTL, capacity, oldest-expiry eviction);
//! a [`CacheStore`] owns the storage, so an in-process map can be swapped
//! for a shared one without touching callers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cartograph_core::{CacheConfig, CartographError, CodeGraph};
use parking_lot::Mutex;

/// A cached graph and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub graph: Arc<CodeGraph>,
    /// Branch named by the request that built it; `None` for the default branch.
    pub requested_branch: Option<String>,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Whether this entry answers a request for `branch` (`None` = default branch).
    ///
    /// A default-branch build also answers requests naming its resolved
    /// branch; a named-branch build never answers a default-branch request.
    pub fn serves(&self, branch: Option<&str>) -> bool {
        match branch {
            None => self.requested_branch.is_none(),
            Some(b) => b == self.graph.branch,
        }
    }
}

/// Backing storage for [`GraphCache`].
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn put(&self, key: String, entry: CacheEntry);
    fn remove(&self, key: &str) -> Option<CacheEntry>;
    /// Every stored key with its expiry.
    fn expiries(&self) -> Vec<(String, Instant)>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store behind a single mutex.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore for InMemoryStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: String, entry: CacheEntry) {
        self.entries.lock().insert(key, entry);
    }

    fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().remove(key)
    }

    fn expiries(&self) -> Vec<(String, Instant)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cartograph_graph::cache::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(clock.now() - start, Duration::from_secs(60));
/// ```
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Graph snapshot cache keyed by `owner/repo`.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CacheConfig, CodeGraph};
/// use cartograph_graph::cache::GraphCache;
///
/// let cache = GraphCache::in_memory(&CacheConfig::default());
/// cache.insert(CodeGraph::new("octocat", "hello", "dev"), Some("dev"));
/// assert!(cache.get("octocat", "hello", Some("dev")).is_some());
/// assert!(cache.get("octocat", "hello", Some("main")).is_none());
/// assert!(cache.get("octocat", "hello", None).is_none());
/// ```
pub struct GraphCache<S: CacheStore = InMemoryStore> {
    store: S,
    clock: Box<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    write_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl GraphCache<InMemoryStore> {
    /// A cache backed by an [`InMemoryStore`] and the system clock.
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(InMemoryStore::default(), config)
    }
}

impl<S: CacheStore> GraphCache<S> {
    pub fn new(store: S, config: &CacheConfig) -> Self {
        Self::with_clock(store, config, Box::new(SystemClock))
    }

    pub fn with_clock(store: S, config: &CacheConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.max(1),
            write_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn key(owner: &str, repo: &str) -> String {
        format!("{owner}/{repo}")
    }

    /// Look up a live graph for `branch` (`None` = default branch). A graph
    /// built for another branch is a miss.
    pub fn get(&self, owner: &str, repo: &str, branch: Option<&str>) -> Option<Arc<CodeGraph>> {
        let key = Self::key(owner, repo);
        let Some(entry) = self.store.get(&key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "graph cache miss");
            return None;
        };

        if entry.expires_at <= self.clock.now() {
            self.remove_expired(&key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "graph cache entry expired");
            return None;
        }
        if !entry.serves(branch) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, cached = %entry.graph.branch, "graph cache branch mismatch");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, "graph cache hit");
        Some(entry.graph)
    }

    /// Remove `key` only if it is still expired once the write lock is held,
    /// so a concurrent insert of a fresh graph survives.
    fn remove_expired(&self, key: &str) {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        if self.store.get(key).is_some_and(|e| e.expires_at <= now) {
            self.store.remove(key);
        }
    }

    /// Store a graph built for `requested_branch` (`None` = default branch),
    /// evicting expired entries and then the oldest-expiring ones until
    /// there is room.
    pub fn insert(&self, graph: CodeGraph, requested_branch: Option<&str>) -> Arc<CodeGraph> {
        let key = graph.repo_key();
        let graph = Arc::new(graph);
        let _guard = self.write_lock.lock();
        let now = self.clock.now();

        let mut live = Vec::new();
        for (k, expires_at) in self.store.expiries() {
            if expires_at <= now {
                self.store.remove(&k);
            } else if k != key {
                live.push((k, expires_at));
            }
        }

        live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = (live.len() + 1).saturating_sub(self.capacity);
        for (k, _) in live.into_iter().take(excess) {
            self.store.remove(&k);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %k, "graph cache eviction");
        }

        self.store.put(
            key,
            CacheEntry {
                graph: Arc::clone(&graph),
                requested_branch: requested_branch.map(str::to_string),
                expires_at: now + self.ttl,
            },
        );
        graph
    }

    /// Return the cached graph or build, cache and return a new one.
    ///
    /// # Errors
    ///
    /// Propagates the builder's error; nothing is cached in that case.
    pub async fn get_or_build<F, Fut>(
        &self,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
        build: F,
    ) -> Result<Arc<CodeGraph>, CartographError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CodeGraph, CartographError>>,
    {
        if let Some(graph) = self.get(owner, repo, branch) {
            return Ok(graph);
        }
        let graph = build().await?;
        Ok(self.insert(graph, branch))
    }

    /// Drop one repository's graph.
    pub fn invalidate(&self, owner: &str, repo: &str) -> bool {
        let _guard = self.write_lock.lock();
        self.store.remove(&Self::key(owner, repo)).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.store.len(),
        }
    }
}
