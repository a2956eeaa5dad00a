//! The in-memory document store backend.

use {
    super::{DocumentStore, FIELD_CHANGED, FIELD_CREATED, FIELD_ID, ReadQuery, filter, update},
    crate::lifecycle::{Component, Lifecycle},
    crate::utils::unix_nanos,
    crate::{Error, Result},
    async_trait::async_trait,
    parking_lot::RwLock,
    serde_json::{Map, Value},
    std::cmp::Ordering,
    std::collections::HashMap,
    uuid::Uuid,
};

/// Reference store backend over a map of named collections.
///
/// Writes are serialized by a single RwLock; reads clone matching
/// documents so callers never observe concurrent mutation.
pub struct MemoryStore {
    lifecycle: Lifecycle,
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new("store"),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn stamp_new(doc: Value) -> Result<Value> {
        let mut object = match doc {
            Value::Object(object) => object,
            other => {
                return Err(Error::store(format!(
                    "documents must be JSON objects, got {other}"
                )));
            }
        };
        let now = unix_nanos();
        object.insert(FIELD_ID.to_string(), Value::from(Uuid::new_v4().to_string()));
        object.insert(FIELD_CREATED.to_string(), Value::from(now));
        object.insert(FIELD_CHANGED.to_string(), Value::from(now));
        Ok(Value::Object(object))
    }
}

fn sort_documents(docs: &mut [Value], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let left = filter::lookup_path(a, field);
            let right = filter::lookup_path(b, field);
            let ordering = compare_fields(left, right);
            let ordering = if *direction < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare_fields(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => filter::compare(Some(a), b).unwrap_or(Ordering::Equal),
    }
}

/// Builds the seed document for an upsert from the equality conditions of
/// the filter; operator conditions contribute nothing.
fn upsert_seed(filter_doc: &Value) -> Value {
    let mut seed = Map::new();
    if let Some(conditions) = filter_doc.as_object() {
        for (path, condition) in conditions {
            let is_operator_condition = condition
                .as_object()
                .is_some_and(|object| object.keys().any(|k| k.starts_with('$')));
            if !is_operator_condition && !path.contains('.') {
                seed.insert(path.clone(), condition.clone());
            }
        }
    }
    Value::Object(seed)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_documents(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>> {
        if collection.is_empty() {
            return Err(Error::store("collection name must not be empty"));
        }

        let mut stamped = Vec::with_capacity(docs.len());
        for doc in docs {
            stamped.push(Self::stamp_new(doc)?);
        }

        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(stamped.iter().cloned());
        Ok(stamped)
    }

    async fn read_documents(
        &self,
        collection: &str,
        query: &ReadQuery,
    ) -> Result<(Vec<Value>, usize)> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok((Vec::new(), 0));
        };

        let mut matching: Vec<Value> = docs
            .iter()
            .filter(|doc| filter::matches(doc, &query.filter))
            .cloned()
            .collect();
        drop(collections);

        let total = matching.len();
        sort_documents(&mut matching, &query.sort);

        let page: Vec<Value> = matching
            .into_iter()
            .skip(query.skip)
            .take(if query.limit == 0 {
                usize::MAX
            } else {
                query.limit
            })
            .collect();

        Ok((page, total))
    }

    async fn update_documents(
        &self,
        collection: &str,
        filter_doc: &Value,
        update_doc: &Value,
        upsert: bool,
    ) -> Result<u64> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        let now = unix_nanos();
        let mut touched = 0u64;
        for doc in docs.iter_mut() {
            if filter::matches(doc, filter_doc) {
                update::apply(doc, update_doc)?;
                if let Some(object) = doc.as_object_mut() {
                    object.insert(FIELD_CHANGED.to_string(), Value::from(now));
                }
                touched += 1;
            }
        }

        if touched == 0 && upsert {
            let mut seed = Self::stamp_new(upsert_seed(filter_doc))?;
            update::apply(&mut seed, update_doc)?;
            docs.push(seed);
            touched = 1;
        }

        Ok(touched)
    }

    async fn delete_documents(&self, collection: &str, filter_doc: &Value) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !filter::matches(doc, filter_doc));
        Ok((before - docs.len()) as u64)
    }

    async fn collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }
}

#[async_trait]
impl Component for MemoryStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;
        guard.complete();
        tracing::info!("document store started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        tracing::info!("document store stopped");
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

    #[tokio::test]
    async fn test_create_stamps_identity_and_timestamps() {
        let store = MemoryStore::new();
        let created = store
            .create_documents("users", vec![json!({"name": "alice"})])
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        let doc = &created[0];
        assert!(doc[FIELD_ID].as_str().is_some());
        assert!(doc[FIELD_CREATED].as_i64().unwrap() > 0);
        assert_eq!(doc[FIELD_CREATED], doc[FIELD_CHANGED]);
        assert_eq!(doc["name"], "alice");

        // The collection was auto-created.
        assert_eq!(store.collections().await, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_create_rejects_non_objects() {
        let store = MemoryStore::new();
        let err = store
            .create_documents("users", vec![json!([1, 2])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Store);
    }

    #[tokio::test]
    async fn test_read_with_filter_and_total() {
        let store = MemoryStore::new();
        store
            .create_documents(
                "users",
                vec![
                    json!({"name": "alice", "age": 34}),
                    json!({"name": "bob", "age": 25}),
                    json!({"name": "carol", "age": 41}),
                ],
            )
            .await
            .unwrap();

        let (docs, total) = store
            .read_documents(
                "users",
                &ReadQuery::with_filter(json!({"age": {"$gte": 30}})),
            )
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_read_sort_skip_limit() {
        let store = MemoryStore::new();
        store
            .create_documents(
                "nums",
                vec![
                    json!({"n": 3}),
                    json!({"n": 1}),
                    json!({"n": 4}),
                    json!({"n": 2}),
                ],
            )
            .await
            .unwrap();

        let (docs, total) = store
            .read_documents(
                "nums",
                &ReadQuery::all().sort_by("n", 1).paginate(1, 2),
            )
            .await
            .unwrap();

        // Total reflects the match count before pagination.
        assert_eq!(total, 4);
        let ns: Vec<i64> = docs.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_read_sort_descending() {
        let store = MemoryStore::new();
        store
            .create_documents(
                "nums",
                vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 2})],
            )
            .await
            .unwrap();

        let (docs, _) = store
            .read_documents("nums", &ReadQuery::all().sort_by("n", -1))
            .await
            .unwrap();
        let ns: Vec<i64> = docs.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_sort_is_stable_across_equal_keys() {
        let store = MemoryStore::new();
        store
            .create_documents(
                "rows",
                vec![
                    json!({"g": 1, "tag": "first"}),
                    json!({"g": 1, "tag": "second"}),
                    json!({"g": 0, "tag": "third"}),
                ],
            )
            .await
            .unwrap();

        let (docs, _) = store
            .read_documents("rows", &ReadQuery::all().sort_by("g", 1))
            .await
            .unwrap();
        let tags: Vec<&str> = docs.iter().map(|d| d["tag"].as_str().unwrap()).collect();
        // Insertion order preserved within the g=1 group.
        assert_eq!(tags, vec!["third", "first", "second"]);
    }

    #[tokio::test]
    async fn test_read_missing_collection_is_empty() {
        let store = MemoryStore::new();
        let (docs, total) = store
            .read_documents("ghost", &ReadQuery::all())
            .await
            .unwrap();
        assert!(docs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_update_refreshes_ch_time() {
        let store = MemoryStore::new();
        let created = store
            .create_documents("users", vec![json!({"name": "alice", "visits": 1})])
            .await
            .unwrap();
        let original_ch = created[0][FIELD_CHANGED].as_i64().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let touched = store
            .update_documents(
                "users",
                &json!({"name": "alice"}),
                &json!({"$inc": {"visits": 1}}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let (docs, _) = store.read_documents("users", &ReadQuery::all()).await.unwrap();
        assert_eq!(docs[0]["visits"], 2);
        assert!(docs[0][FIELD_CHANGED].as_i64().unwrap() > original_ch);
        // cr_time is untouched by updates.
        assert_eq!(docs[0][FIELD_CREATED], created[0][FIELD_CREATED]);
    }

    #[tokio::test]
    async fn test_update_without_match_touches_nothing() {
        let store = MemoryStore::new();
        store
            .create_documents("users", vec![json!({"name": "alice"})])
            .await
            .unwrap();

        let touched = store
            .update_documents(
                "users",
                &json!({"name": "ghost"}),
                &json!({"$set": {"x": 1}}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[tokio::test]
    async fn test_upsert_creates_one_document() {
        let store = MemoryStore::new();
        let touched = store
            .update_documents(
                "counters",
                &json!({"key": "pageviews"}),
                &json!({"$inc": {"value": 1}}),
                true,
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let (docs, total) = store
            .read_documents("counters", &ReadQuery::all())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(docs[0]["key"], "pageviews");
        assert_eq!(docs[0]["value"], 1);
        assert!(docs[0][FIELD_ID].as_str().is_some());
    }

    #[tokio::test]
    async fn test_upsert_seed_ignores_operator_conditions() {
        let store = MemoryStore::new();
        store
            .update_documents(
                "rows",
                &json!({"kind": "a", "age": {"$gt": 10}}),
                &json!({"$set": {"fresh": true}}),
                true,
            )
            .await
            .unwrap();

        let (docs, _) = store.read_documents("rows", &ReadQuery::all()).await.unwrap();
        assert_eq!(docs[0]["kind"], "a");
        assert!(docs[0].get("age").is_none());
        assert_eq!(docs[0]["fresh"], true);
    }

    #[tokio::test]
    async fn test_delete_documents() {
        let store = MemoryStore::new();
        store
            .create_documents(
                "users",
                vec![
                    json!({"name": "alice"}),
                    json!({"name": "bob"}),
                    json!({"name": "alice"}),
                ],
            )
            .await
            .unwrap();

        let removed = store
            .delete_documents("users", &json!({"name": "alice"}))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let (_, total) = store.read_documents("users", &ReadQuery::all()).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_delete_from_missing_collection() {
        let store = MemoryStore::new();
        let removed = store.delete_documents("ghost", &json!({})).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_update_by_internal_id() {
        let store = MemoryStore::new();
        let created = store
            .create_documents("users", vec![json!({"name": "alice"})])
            .await
            .unwrap();
        let id = created[0][FIELD_ID].as_str().unwrap().to_string();

        let touched = store
            .update_documents(
                "users",
                &json!({FIELD_ID: id}),
                &json!({"$set": {"name": "alicia"}}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);
    }
}
