//! Document store: named collections with MongoDB-style filters and
//! updates.
//!
//! Documents are JSON objects. The store stamps `internal_id` (a UUID),
//! `cr_time` and `ch_time` (nanoseconds since the Unix epoch) on creation;
//! `ch_time` is refreshed on every update. Identity is `internal_id`.

pub mod filter;
pub mod update;

mod memory;

pub use memory::MemoryStore;

use {crate::Result, async_trait::async_trait, serde_json::Value};

/// Field names stamped by the store.
pub const FIELD_ID: &str = "internal_id";
pub const FIELD_CREATED: &str = "cr_time";
pub const FIELD_CHANGED: &str = "ch_time";

/// Pagination and ordering for a read.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    /// Filter document; empty matches everything.
    pub filter: Value,
    /// Sort fields in priority order: positive direction sorts ascending,
    /// negative descending. The sort is stable.
    pub sort: Vec<(String, i32)>,
    /// Documents skipped after sorting.
    pub skip: usize,
    /// Maximum documents returned; 0 means unlimited.
    pub limit: usize,
}

impl ReadQuery {
    /// A query matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// A query with just a filter.
    pub fn with_filter(filter: Value) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Adds a sort field.
    pub fn sort_by(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    /// Sets pagination.
    pub fn paginate(mut self, skip: usize, limit: usize) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

/// The document store interface.
///
/// Collections are addressed by name and auto-created on first write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts documents, stamping identity and timestamps. Returns the
    /// stored documents including the stamps.
    async fn create_documents(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>>;

    /// Reads documents matching the query. Returns the page and the total
    /// match count before pagination.
    async fn read_documents(
        &self,
        collection: &str,
        query: &ReadQuery,
    ) -> Result<(Vec<Value>, usize)>;

    /// Applies an update to every matching document, refreshing `ch_time`.
    /// With `upsert`, creates one document when nothing matches. Returns
    /// the number of documents touched.
    async fn update_documents(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<u64>;

    /// Removes every matching document. Returns the number removed.
    async fn delete_documents(&self, collection: &str, filter: &Value) -> Result<u64>;

    /// Lists existing collection names.
    async fn collections(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_query_builders() {
        let query = ReadQuery::with_filter(json!({"kind": "a"}))
            .sort_by("age", -1)
            .sort_by("name", 1)
            .paginate(10, 5);
        assert_eq!(query.sort.len(), 2);
        assert_eq!(query.sort[0], ("age".to_string(), -1));
        assert_eq!(query.skip, 10);
        assert_eq!(query.limit, 5);
    }
}
