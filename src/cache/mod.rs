//! Keyed cache with TTL eviction, capacity bounds and dependency-based
//! invalidation.
//!
//! Cache keys are composed deterministically from a request path, the
//! current revision of every named dependency, and free-form metadata
//! pairs: `path|dep₁|rev₁|dep₂|rev₂|k:v|…`. Invalidating a dependency bumps
//! its revision, so future keys never collide with stale ones, and
//! removes every entry that named it during key construction.
//!
//! The in-memory engine in [`memory`] is the reference implementation.
//! Alternate backends (a distributed store, say) register through the
//! backend registry and must honor the same `invalidate` fan-out contract;
//! they are allowed best-effort consistency on the dependency graph and
//! must document it.

mod memory;

pub use memory::MemoryCache;

use {
    crate::Result,
    async_trait::async_trait,
    serde_json::Value,
    std::collections::BTreeMap,
    std::time::Duration,
};

/// TTL applied when a caller passes [`Duration::ZERO`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on any entry TTL; larger requests are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Counters describing one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found nothing, or found an expired entry.
    pub misses: u64,
    /// Entries removed by the FIFO capacity bound.
    pub evictions: u64,
    /// Entries removed through dependency invalidation.
    pub invalidations: u64,
    /// Entries removed because their TTL elapsed.
    pub expired: u64,
    /// Live entries at the time of the snapshot.
    pub entries: usize,
    /// Distinct dependency keys currently tracked.
    pub dependencies: usize,
}

/// The cache engine interface consumed by the request pipeline.
///
/// Values are owned exclusively by the engine; `get` returns a clone so
/// callers can never observe a concurrent overwrite mid-read.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Looks up a key. An expired entry counts as a miss and is removed.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores a value under a key.
    ///
    /// A zero `ttl` falls back to the engine default; TTLs above the
    /// maximum are clamped. An empty key is rejected. Inserting a new key
    /// at capacity evicts the oldest entry by creation time (FIFO).
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Removes a key and detaches it from all dependency lists. Idempotent.
    async fn delete(&self, key: &str);

    /// Bumps each dependency's revision and removes every entry that named
    /// it. Unknown dependencies still get their revision bumped.
    async fn invalidate(&self, dependencies: &[&str]);

    /// Composes a deterministic cache key and registers the dependency
    /// edges so a later `invalidate` can find this key.
    fn build_cache_key(
        &self,
        path: &str,
        dependencies: &[&str],
        metadata: &BTreeMap<String, String>,
    ) -> String;

    /// Returns the current revision of a dependency (0 when never bumped).
    fn revision(&self, dependency: &str) -> u64;

    /// Returns a snapshot of the instance counters.
    fn stats(&self) -> CacheStats;
}

/// Clamps a requested TTL into the engine's accepted range.
pub(crate) fn clamp_ttl(requested: Duration, default_ttl: Duration, max_ttl: Duration) -> Duration {
    if requested.is_zero() {
        default_ttl
    } else if requested > max_ttl {
        max_ttl
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ttl_zero_uses_default() {
        assert_eq!(clamp_ttl(Duration::ZERO, DEFAULT_TTL, MAX_TTL), DEFAULT_TTL);
    }

    #[test]
    fn test_clamp_ttl_above_max_is_clamped() {
        let requested = MAX_TTL + Duration::from_secs(1);
        assert_eq!(clamp_ttl(requested, DEFAULT_TTL, MAX_TTL), MAX_TTL);
    }

    #[test]
    fn test_clamp_ttl_in_range_passes_through() {
        let requested = Duration::from_secs(120);
        assert_eq!(clamp_ttl(requested, DEFAULT_TTL, MAX_TTL), requested);
    }
}
