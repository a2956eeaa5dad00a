//! The in-memory cache engine.

use {
    super::{Cache, CacheStats, clamp_ttl},
    crate::config::CacheConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::{Error, Result},
    async_trait::async_trait,
    parking_lot::{Mutex, RwLock},
    serde_json::Value,
    std::collections::{BTreeMap, HashMap},
    std::sync::Arc,
    std::sync::atomic::{AtomicU64, Ordering},
    std::time::{Duration, Instant},
    tokio::task::JoinHandle,
};

struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct DependencyGraph {
    /// dependency → cache keys that named it, in registration order.
    dependents: HashMap<String, DepList>,
    /// cache key → dependencies it named, the reverse index used to detach
    /// an entry on delete and eviction.
    key_deps: HashMap<String, Vec<String>>,
    /// Monotonic counter stamping dependency first-seen order, consulted by
    /// compaction to drop the least recently inserted dependencies.
    next_seq: u64,
}

struct DepList {
    seq: u64,
    keys: Vec<String>,
}

impl DependencyGraph {
    fn register(&mut self, key: &str, dependencies: &[&str], max_dependents: usize) {
        for dep in dependencies {
            if !self.dependents.contains_key(*dep) {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.dependents.insert(
                    (*dep).to_string(),
                    DepList {
                        seq,
                        keys: Vec::new(),
                    },
                );
            }
            let list = self.dependents.get_mut(*dep).expect("inserted above");
            if !list.keys.iter().any(|k| k == key) {
                list.keys.push(key.to_string());
            }

            if list.keys.len() > max_dependents {
                // Keep only the most recent 80% of the allowed length.
                let keep = (max_dependents * 4) / 5;
                let overflow = list.keys.len().saturating_sub(keep);
                let dropped: Vec<String> = list.keys.drain(..overflow).collect();
                for dropped_key in dropped {
                    if let Some(deps) = self.key_deps.get_mut(&dropped_key) {
                        deps.retain(|d| d.as_str() != *dep);
                        if deps.is_empty() {
                            self.key_deps.remove(&dropped_key);
                        }
                    }
                }
            }
        }

        let reverse = self.key_deps.entry(key.to_string()).or_default();
        for dep in dependencies {
            if !reverse.iter().any(|d| d == dep) {
                reverse.push((*dep).to_string());
            }
        }
    }

    /// Removes all back-references of a cache key.
    fn detach(&mut self, key: &str) {
        if let Some(deps) = self.key_deps.remove(key) {
            for dep in deps {
                if let Some(list) = self.dependents.get_mut(&dep) {
                    list.keys.retain(|k| k != key);
                    if list.keys.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
    }

    /// Takes the dependents of a dependency, clearing its list.
    fn take_dependents(&mut self, dep: &str) -> Vec<String> {
        let keys = self
            .dependents
            .remove(dep)
            .map(|list| list.keys)
            .unwrap_or_default();
        for key in &keys {
            if let Some(deps) = self.key_deps.get_mut(key) {
                deps.retain(|d| d != dep);
                if deps.is_empty() {
                    self.key_deps.remove(key);
                }
            }
        }
        keys
    }

    /// Shrinks the graph to 80% of `max_dependencies`, dropping the least
    /// recently inserted dependencies first.
    fn compact(&mut self, max_dependencies: usize) -> usize {
        if self.dependents.len() <= max_dependencies {
            return 0;
        }
        let target = (max_dependencies * 4) / 5;
        let mut by_age: Vec<(u64, String)> = self
            .dependents
            .iter()
            .map(|(dep, list)| (list.seq, dep.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);

        let drop_count = self.dependents.len().saturating_sub(target);
        let mut dropped = 0;
        for (_, dep) in by_age.into_iter().take(drop_count) {
            self.take_dependents(&dep);
            dropped += 1;
        }
        dropped
    }
}

struct Inner {
    config: CacheConfig,
    data: RwLock<HashMap<String, CacheEntry>>,
    revisions: RwLock<HashMap<String, u64>>,
    graph: RwLock<DependencyGraph>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    expired: AtomicU64,
}

impl Inner {
    fn cleanup(&self) {
        let now = Instant::now();
        let mut data = self.data.write();
        let expired_keys: Vec<String> = data
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut graph = self.graph.write();
        for key in &expired_keys {
            data.remove(key);
            graph.detach(key);
        }
        let dropped_deps = graph.compact(self.config.max_dependencies);
        drop(graph);
        drop(data);

        if !expired_keys.is_empty() {
            self.expired
                .fetch_add(expired_keys.len() as u64, Ordering::Relaxed);
            tracing::info!(
                removed = expired_keys.len(),
                "cache cleanup removed expired entries"
            );
        }
        if dropped_deps > 0 {
            tracing::debug!(dropped = dropped_deps, "compacted dependency graph");
        }
    }

    fn evict_oldest(&self, data: &mut HashMap<String, CacheEntry>) {
        let oldest = data
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            data.remove(&key);
            self.graph.write().detach(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "evicted cache entry at capacity");
        }
    }
}

/// The reference cache engine: TTL plus FIFO capacity bounds over a plain
/// map, with the dependency graph and revision store behind their own
/// locks.
///
/// Lock order is `data → revisions → dependencies` on every path that needs
/// more than one; nothing external is called while a lock is held.
pub struct MemoryCache {
    lifecycle: Lifecycle,
    inner: Arc<Inner>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    /// Creates an engine from configuration. The background cleanup pass
    /// starts with the component.
    pub fn new(config: CacheConfig) -> Self {
        // Warn once on unknown eviction policies; FIFO is the only
        // implemented behavior.
        let _ = config.normalized_eviction();
        Self {
            lifecycle: Lifecycle::new("cache"),
            inner: Arc::new(Inner {
                config,
                data: RwLock::new(HashMap::new()),
                revisions: RwLock::new(HashMap::new()),
                graph: RwLock::new(DependencyGraph::default()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                expired: AtomicU64::new(0),
            }),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Runs one cleanup pass, removing expired entries and compacting the
    /// dependency graph. The background ticker calls this at
    /// `cleanup_interval`; exposed for tests and operational tooling.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let data = self.inner.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, fall through to the write path
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Upgrade to a write lock and double-check: another writer may have
        // replaced the entry since the read lock was released.
        let mut data = self.inner.data.write();
        match data.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                data.remove(key);
                self.inner.graph.write().detach(key);
                drop(data);
                self.inner.expired.fetch_add(1, Ordering::Relaxed);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if key.is_empty() {
            return Err(Error::cache("cache key must not be empty"));
        }

        let ttl = clamp_ttl(ttl, self.inner.config.default_ttl, self.inner.config.max_ttl);
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
        };

        let mut data = self.inner.data.write();
        let is_new_key = !data.contains_key(key);
        if is_new_key && data.len() >= self.inner.config.max_entries {
            self.inner.evict_oldest(&mut data);
            if data.len() >= self.inner.config.max_entries {
                tracing::error!(
                    key = %key,
                    max_entries = self.inner.config.max_entries,
                    "cache is full and eviction made no room"
                );
                return Err(Error::capacity(format!(
                    "cache full at {} entries, eviction made no room",
                    data.len()
                )));
            }
        }
        if !is_new_key {
            // Overwrite preserves no state: the old entry's dependency
            // edges go with it. Keys built through key composition get
            // their edges re-registered at the next build.
            self.inner.graph.write().detach(key);
        }
        data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) {
        let mut data = self.inner.data.write();
        data.remove(key);
        self.inner.graph.write().detach(key);
    }

    async fn invalidate(&self, dependencies: &[&str]) {
        if dependencies.is_empty() {
            return;
        }

        let mut data = self.inner.data.write();
        let mut revisions = self.inner.revisions.write();
        let mut graph = self.inner.graph.write();

        let mut removed = 0u64;
        for dep in dependencies {
            *revisions.entry((*dep).to_string()).or_insert(0) += 1;

            for key in graph.take_dependents(dep) {
                if data.remove(&key).is_some() {
                    removed += 1;
                }
            }

            // The dependency name may itself be a cache key (direct
            // invalidation of a known entry); remove it too.
            if data.remove(*dep).is_some() {
                graph.detach(dep);
                removed += 1;
            }
        }

        drop(graph);
        drop(revisions);
        drop(data);

        self.inner.invalidations.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(
            dependencies = dependencies.len(),
            removed,
            "cache invalidation"
        );
    }

    fn build_cache_key(
        &self,
        path: &str,
        dependencies: &[&str],
        metadata: &BTreeMap<String, String>,
    ) -> String {
        let mut key = String::with_capacity(path.len() + dependencies.len() * 16);
        key.push_str(path);

        {
            // Revisions are read under their own lock so heavy key-building
            // load never blocks writers of unrelated cache keys.
            let revisions = self.inner.revisions.read();
            for dep in dependencies {
                let rev = revisions.get(*dep).copied().unwrap_or(0);
                key.push('|');
                key.push_str(dep);
                key.push('|');
                key.push_str(&rev.to_string());
            }
        }

        for (name, value) in metadata {
            key.push('|');
            key.push_str(name);
            key.push(':');
            key.push_str(value);
        }

        if !dependencies.is_empty() {
            self.inner.graph.write().register(
                &key,
                dependencies,
                self.inner.config.max_dependents_per_key,
            );
        }

        key
    }

    fn revision(&self, dependency: &str) -> u64 {
        self.inner
            .revisions
            .read()
            .get(dependency)
            .copied()
            .unwrap_or(0)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
            entries: self.inner.data.read().len(),
            dependencies: self.inner.graph.read().dependents.len(),
        }
    }
}

#[async_trait]
impl Component for MemoryCache {
    fn name(&self) -> &str {
        "cache"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;
        let cancel = self.lifecycle.cancellation_token();
        let interval = self.inner.config.cleanup_interval;
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => inner.cleanup(),
                }
            }
        });
        *self.cleanup_task.lock() = Some(task);

        guard.complete();
        tracing::info!(
            max_entries = self.inner.config.max_entries,
            cleanup_interval = ?interval,
            "cache engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            // The scope is already cancelled; wait for the ticker to drain.
            let _ = task.await;
        }
        tracing::info!("cache engine stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(max_entries: usize) -> MemoryCache {
        let mut config = CacheConfig::default();
        config.max_entries = max_entries;
        MemoryCache::new(config)
    }

    #[tokio::test]
    async fn test_set_then_get_within_ttl() {
        let cache = cache_with(16);
        cache
            .set("k", json!("v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!("v")));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_get_after_expiry_is_miss() {
        let cache = cache_with(16);
        cache
            .set("k", json!("v"), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await, None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let cache = cache_with(16);
        let err = cache.set("", json!(1), Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cache);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let cache = cache_with(16);
        cache.set("k", json!(1), Duration::ZERO).await.unwrap();
        // Entry is live well past the zero duration.
        assert_eq!(cache.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_fifo_eviction_at_capacity() {
        let cache = cache_with(2);
        cache
            .set("a", json!(1), Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache
            .set("b", json!(2), Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache
            .set("c", json!(3), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(json!(2)));
        assert_eq!(cache.get("c").await, Some(json!(3)));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);
    }

    #[tokio::test]
    async fn test_capacity_holds_after_many_inserts() {
        let cache = cache_with(3);
        for i in 0..10 {
            cache
                .set(&format!("key-{i}"), json!(i), Duration::from_secs(3600))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.evictions, 7);
        // The survivors are the most recently inserted keys.
        assert!(cache.get("key-7").await.is_some());
        assert!(cache.get("key-8").await.is_some());
        assert!(cache.get("key-9").await.is_some());
    }

    #[tokio::test]
    async fn test_zero_capacity_set_is_capacity_error() {
        let cache = cache_with(0);
        let err = cache.set("k", json!(1), Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Capacity);
    }

    #[tokio::test]
    async fn test_overwrite_preserves_no_state() {
        let cache = cache_with(16);
        cache
            .set("k", json!("old"), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("k", json!("new"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!("new")));
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_overwrite_detaches_old_dependencies() {
        let cache = cache_with(16);
        let key = cache.build_cache_key("/a", &["dep"], &BTreeMap::new());
        cache
            .set(&key, json!(1), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(cache.stats().dependencies, 1);

        // A plain overwrite of the same key drops the edges the old entry
        // registered; nothing stale is left for a later invalidation.
        cache
            .set(&key, json!(2), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(cache.stats().dependencies, 0);

        cache.invalidate(&["dep"]).await;
        assert_eq!(cache.stats().invalidations, 0);
        assert_eq!(cache.get(&key).await, Some(json!(2)));
        // The revision still advances so future composed keys are fresh.
        assert_eq!(cache.revision("dep"), 1);
    }

    #[tokio::test]
    async fn test_rebuilt_key_restores_dependency_edges() {
        let cache = cache_with(16);
        let empty = BTreeMap::new();
        let key = cache.build_cache_key("/a", &["dep"], &empty);
        cache
            .set(&key, json!(1), Duration::from_secs(3600))
            .await
            .unwrap();
        cache
            .set(&key, json!(2), Duration::from_secs(3600))
            .await
            .unwrap();

        // The next key build under the same revision re-registers the
        // edges, so invalidation finds the overwritten entry again.
        let rebuilt = cache.build_cache_key("/a", &["dep"], &empty);
        assert_eq!(rebuilt, key);
        cache.invalidate(&["dep"]).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = cache_with(16);
        cache.set("k", json!(1), Duration::ZERO).await.unwrap();
        cache.delete("k").await;
        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_build_cache_key_is_deterministic() {
        let cache = cache_with(16);
        let mut metadata = BTreeMap::new();
        metadata.insert("user".to_string(), "42".to_string());

        let k1 = cache.build_cache_key("/orders", &["orders"], &metadata);
        let k2 = cache.build_cache_key("/orders", &["orders"], &metadata);
        assert_eq!(k1, k2);
        assert_eq!(k1, "/orders|orders|0|user:42");
    }

    #[tokio::test]
    async fn test_invalidate_changes_future_keys() {
        let cache = cache_with(16);
        let before = cache.build_cache_key("/orders", &["orders"], &BTreeMap::new());
        cache.invalidate(&["orders"]).await;
        let after = cache.build_cache_key("/orders", &["orders"], &BTreeMap::new());

        assert_ne!(before, after);
        assert_eq!(cache.revision("orders"), 1);
    }

    #[tokio::test]
    async fn test_invalidate_removes_all_dependents() {
        let cache = cache_with(16);
        let k1 = cache.build_cache_key("/a", &["dep"], &BTreeMap::new());
        cache
            .set(&k1, json!(1), Duration::from_secs(3600))
            .await
            .unwrap();
        let k2 = cache.build_cache_key("/b", &["dep"], &BTreeMap::new());
        cache
            .set(&k2, json!(2), Duration::from_secs(3600))
            .await
            .unwrap();

        cache.invalidate(&["dep"]).await;

        assert_eq!(cache.get(&k1).await, None);
        assert_eq!(cache.get(&k2).await, None);
        assert_eq!(cache.revision("dep"), 1);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_direct_key() {
        // A dependency name that is itself a cache key removes that entry.
        let cache = cache_with(16);
        cache.set("K1", json!("V"), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("K1").await, Some(json!("V")));

        cache.invalidate(&["K1"]).await;
        assert_eq!(cache.get("K1").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_dep_bumps_revision() {
        let cache = cache_with(16);
        cache.invalidate(&["ghost"]).await;
        cache.invalidate(&["ghost"]).await;
        assert_eq!(cache.revision("ghost"), 2);
    }

    #[tokio::test]
    async fn test_delete_detaches_dependencies() {
        let cache = cache_with(16);
        let key = cache.build_cache_key("/a", &["dep"], &BTreeMap::new());
        cache.set(&key, json!(1), Duration::ZERO).await.unwrap();
        cache.delete(&key).await;

        // The graph no longer references the key, so invalidation removes
        // nothing.
        cache.invalidate(&["dep"]).await;
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[tokio::test]
    async fn test_eviction_detaches_dependencies() {
        let cache = cache_with(1);
        let k1 = cache.build_cache_key("/a", &["dep"], &BTreeMap::new());
        cache
            .set(&k1, json!(1), Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache
            .set("other", json!(2), Duration::from_secs(3600))
            .await
            .unwrap();

        // k1 was evicted; dep lists must not keep a dangling reference.
        assert_eq!(cache.stats().dependencies, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = cache_with(16);
        cache
            .set("short", json!(1), Duration::from_millis(5))
            .await
            .unwrap();
        cache
            .set("long", json!(2), Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.cleanup();

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_dependency_graph_compaction() {
        let mut config = CacheConfig::default();
        config.max_dependencies = 10;
        let cache = MemoryCache::new(config);

        for i in 0..25 {
            let dep = format!("dep-{i}");
            let key = cache.build_cache_key("/p", &[dep.as_str()], &BTreeMap::new());
            cache
                .set(&key, json!(i), Duration::from_millis(1))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.cleanup();

        assert!(cache.stats().dependencies <= 10);
    }

    #[tokio::test]
    async fn test_dependents_list_trimmed_at_cap() {
        let mut config = CacheConfig::default();
        config.max_dependents_per_key = 10;
        let cache = MemoryCache::new(config);

        for i in 0..30 {
            let mut metadata = BTreeMap::new();
            metadata.insert("i".to_string(), i.to_string());
            let _ = cache.build_cache_key("/p", &["hot"], &metadata);
        }

        let graph = cache.inner.graph.read();
        assert!(graph.dependents.get("hot").unwrap().keys.len() <= 10);
    }

    #[tokio::test]
    async fn test_component_lifecycle() {
        let cache = cache_with(16);
        cache.start().await.unwrap();
        assert!(cache.is_running());

        let err = cache.start().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyRunning);

        cache.stop().await.unwrap();
        assert!(!cache.is_running());

        let err = cache.stop().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn test_concurrent_sets_serialize() {
        let cache = std::sync::Arc::new(cache_with(64));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let cache = std::sync::Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache.set("shared", json!(i), Duration::ZERO).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // A later get reflects exactly one of the writes, never a torn value.
        let value = cache.get("shared").await.unwrap();
        let n = value.as_i64().unwrap();
        assert!((0..16).contains(&n));
    }

    mod proptest_keys {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Key composition is deterministic under fixed revisions.
            #[test]
            fn key_composition_deterministic(
                path in "/[a-z]{1,12}",
                deps in proptest::collection::vec("[a-z]{1,8}", 0..4),
                meta in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 0..4)
            ) {
                let cache = cache_with(16);
                let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                let k1 = cache.build_cache_key(&path, &dep_refs, &meta);
                let k2 = cache.build_cache_key(&path, &dep_refs, &meta);
                prop_assert_eq!(k1, k2);
            }

            /// Bumping any named dependency always changes the key.
            #[test]
            fn invalidation_changes_key(
                path in "/[a-z]{1,12}",
                dep in "[a-z]{1,8}"
            ) {
                let cache = cache_with(16);
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                let before = cache.build_cache_key(&path, &[dep.as_str()], &BTreeMap::new());
                rt.block_on(cache.invalidate(&[dep.as_str()]));
                let after = cache.build_cache_key(&path, &[dep.as_str()], &BTreeMap::new());
                prop_assert_ne!(before, after);
            }
        }
    }
}
