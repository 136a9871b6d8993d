//! In-memory document store.
//!
//! Besides serving tests and single-node deployments, the backend can simulate a
//! degraded store through a [`FaultPlan`]: per-operation artificial latency and
//! injected failures.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::StorageError;
use crate::filter::{CompiledFilter, Filter, compare_values, get_path};
use crate::traits::DocumentStore;
use crate::types::{FindQuery, FindResult, SortDirection, SortField};

/// Default per-document size limit (16 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Store operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Aggregate,
    Find,
    Count,
    Get,
    Write,
}

impl StoreOperation {
    pub const ALL: [StoreOperation; 5] = [
        StoreOperation::Aggregate,
        StoreOperation::Find,
        StoreOperation::Count,
        StoreOperation::Get,
        StoreOperation::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::Aggregate => "aggregate",
            StoreOperation::Find => "find",
            StoreOperation::Count => "count",
            StoreOperation::Get => "get",
            StoreOperation::Write => "write",
        }
    }
}

/// Artificial latency and failures injected before store operations.
#[derive(Debug, Default)]
pub struct FaultPlan {
    latency: Mutex<HashMap<StoreOperation, Duration>>,
    failures: Mutex<HashMap<StoreOperation, FailureWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    skip: u32,
    remaining: u32,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call of `op` by `delay`.
    pub fn set_latency(&self, op: StoreOperation, delay: Duration) {
        self.latency.lock().insert(op, delay);
    }

    pub fn clear_latency(&self, op: StoreOperation) {
        self.latency.lock().remove(&op);
    }

    /// Make the next `count` calls of `op` fail with `StorageError::Unavailable`.
    pub fn fail_next(&self, op: StoreOperation, count: u32) {
        self.fail_after(op, 0, count);
    }

    /// Let the next `skip` calls of `op` succeed, then fail the `count` after them.
    pub fn fail_after(&self, op: StoreOperation, skip: u32, count: u32) {
        self.failures.lock().insert(
            op,
            FailureWindow {
                skip,
                remaining: count,
            },
        );
    }

    pub fn clear(&self) {
        self.latency.lock().clear();
        self.failures.lock().clear();
    }

    async fn before(&self, op: StoreOperation) -> Result<(), StorageError> {
        let delay = self.latency.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut failures = self.failures.lock();
        let Some(window) = failures.get_mut(&op) else {
            return Ok(());
        };
        if window.skip > 0 {
            window.skip -= 1;
        } else if window.remaining > 0 {
            window.remaining -= 1;
            return Err(StorageError::unavailable(format!(
                "injected {} failure",
                op.as_str()
            )));
        }
        Ok(())
    }
}

type Collection = IndexMap<String, Value>;

/// In-memory document store keyed by collection and document id.
#[derive(Debug)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    max_document_bytes: usize,
    faults: Arc<FaultPlan>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            faults: Arc::new(FaultPlan::new()),
        }
    }

    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }

    /// Handle to the fault plan, shared with the store.
    pub fn faults(&self) -> Arc<FaultPlan> {
        Arc::clone(&self.faults)
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn matching(&self, collection: &str, filter: &CompiledFilter) -> Vec<Value> {
        let guard = self.collections.read();
        guard
            .get(collection)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default()
    }

    fn check_size(&self, doc: &Value) -> Result<(), StorageError> {
        let size = serde_json::to_vec(doc)
            .map_err(|e| StorageError::internal(e.to_string()))?
            .len();
        if size > self.max_document_bytes {
            return Err(StorageError::DocumentTooLarge {
                size,
                limit: self.max_document_bytes,
            });
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn document_id(doc: &Value) -> Result<String, StorageError> {
    doc.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StorageError::invalid_query("document must carry a string `id`"))
}

/// Sort by the given fields, falling back to `id` so pagination is deterministic.
fn sort_documents(docs: &mut [Value], sort: &[SortField]) {
    let id_path = vec!["id".to_string()];
    let paths: Vec<(Vec<String>, SortDirection)> = sort
        .iter()
        .map(|s| (s.field.split('.').map(str::to_string).collect(), s.direction))
        .collect();
    docs.sort_by(|a, b| {
        for (path, direction) in &paths {
            let ord = compare_optional(get_path(a, path), get_path(b, path));
            let ord = match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_optional(get_path(a, &id_path), get_path(b, &id_path))
    });
}

/// Missing values sort first.
fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

fn page(docs: Vec<Value>, query: &FindQuery) -> Vec<Value> {
    docs.into_iter()
        .skip(query.skip)
        .take(query.limit)
        .map(|d| query.projection.apply(&d))
        .collect()
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn aggregate_with_count(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<FindResult, StorageError> {
        self.faults.before(StoreOperation::Aggregate).await?;
        let compiled = query.filter.compile()?;
        let mut docs = self.matching(collection, &compiled);
        sort_documents(&mut docs, &query.sort);
        let total = docs.len() as u64;
        Ok(FindResult {
            documents: page(docs, query),
            total,
        })
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StorageError> {
        self.faults.before(StoreOperation::Find).await?;
        let compiled = query.filter.compile()?;
        let mut docs = self.matching(collection, &compiled);
        sort_documents(&mut docs, &query.sort);
        Ok(page(docs, query))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.faults.before(StoreOperation::Count).await?;
        let compiled = filter.compile()?;
        Ok(self.matching(collection, &compiled).len() as u64)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.faults.before(StoreOperation::Get).await?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn insert(&self, collection: &str, doc: Value) -> Result<(), StorageError> {
        self.faults.before(StoreOperation::Write).await?;
        let id = document_id(&doc)?;
        self.check_size(&doc)?;
        let mut guard = self.collections.write();
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StorageError::already_exists(collection, id));
        }
        docs.insert(id, doc);
        Ok(())
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<(), StorageError> {
        self.faults.before(StoreOperation::Write).await?;
        self.check_size(&doc)?;
        let mut guard = self.collections.write();
        match guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
            Some(slot) => {
                *slot = doc;
                Ok(())
            }
            None => Err(StorageError::not_found(collection, id)),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        self.faults.before(StoreOperation::Write).await?;
        let mut guard = self.collections.write();
        Ok(guard
            .get_mut(collection)
            .and_then(|docs| docs.shift_remove(id))
            .is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Projection;
    use serde_json::json;
    use tokio_test::block_on;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (id, name, price, qty) in [
            ("a", "Alpha Lamp", 30.0, 5),
            ("b", "Beta Lamp", 10.0, 0),
            ("c", "Gamma Chair", 20.0, 2),
        ] {
            store
                .insert(
                    "products",
                    json!({"id": id, "name": name, "price": price, "quantity": qty}),
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_aggregate_counts_and_pages() {
        let store = seeded().await;
        let query = FindQuery::new(Filter::contains("name", "lamp"))
            .with_sort(vec![SortField::asc("price")])
            .with_limit(1);
        let result = store.aggregate_with_count("products", &query).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0]["id"], "b");
    }

    #[tokio::test]
    async fn test_sort_desc_and_skip() {
        let store = seeded().await;
        let query = FindQuery::new(Filter::all())
            .with_sort(vec![SortField::desc("price")])
            .with_skip(1)
            .with_projection(Projection::include(&["id"]));
        let docs = store.find("products", &query).await.unwrap();
        assert_eq!(docs, vec![json!({"id": "c"}), json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let store = seeded().await;
        let err = store
            .insert("products", json!({"id": "a", "name": "dup"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let err = store
            .replace("products", "zzz", json!({"id": "zzz"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(store.delete("products", "a").await.unwrap());
        assert!(!store.delete("products", "a").await.unwrap());
        assert_eq!(store.len("products"), 2);
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = InMemoryStore::new();
        block_on(async {
            store
                .insert("products", json!({"id": "a", "name": "Lamp"}))
                .await
                .unwrap();
            store
                .insert("archive", json!({"id": "a", "name": "Old Lamp"}))
                .await
                .unwrap();
            let doc = store.get("archive", "a").await.unwrap().unwrap();
            assert_eq!(doc["name"], "Old Lamp");
            assert!(store.get("orders", "a").await.unwrap().is_none());
        });
        assert_eq!(store.len("products"), 1);
        assert_eq!(store.len("orders"), 0);
    }

    #[tokio::test]
    async fn test_document_size_limit() {
        let store = InMemoryStore::new().with_max_document_bytes(64);
        let err = store
            .insert("products", json!({"id": "big", "blob": "x".repeat(100)}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DocumentTooLarge { limit: 64, .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = seeded().await;
        store.faults().fail_next(StoreOperation::Count, 1);
        assert!(store.count("products", &Filter::all()).await.is_err());
        assert_eq!(store.count("products", &Filter::all()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failures_can_start_after_successful_calls() {
        let store = seeded().await;
        store.faults().fail_after(StoreOperation::Count, 2, 1);
        assert!(store.count("products", &Filter::all()).await.is_ok());
        assert!(store.count("products", &Filter::all()).await.is_ok());
        assert!(store.count("products", &Filter::all()).await.is_err());
        assert!(store.count("products", &Filter::all()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_latency() {
        let store = seeded().await;
        store
            .faults()
            .set_latency(StoreOperation::Get, Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        let doc = store.get("products", "a").await.unwrap();
        assert!(doc.is_some());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
