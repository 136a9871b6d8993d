//! TimedStore - a store wrapper that bounds every operation by a time budget.
//!
//! Every call is raced against its budget with `tokio::time::timeout`. A call
//! that runs out of budget surfaces as [`StorageError::Timeout`] and the inner
//! future is dropped. Calls that succeed but take longer than the slow-call
//! threshold are logged.
//!
//! # Example
//!
//! ```ignore
//! use catalog_storage::{InMemoryStore, StoreBudgets, TimedStore};
//!
//! let store = TimedStore::new(InMemoryStore::new(), StoreBudgets::default());
//! let docs = store.find("products", &query).await?;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::StorageError;
use crate::filter::Filter;
use crate::traits::DocumentStore;
use crate::types::{FindQuery, FindResult};

/// Per-operation time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreBudgets {
    #[serde(with = "duration_millis")]
    pub read: Duration,
    #[serde(with = "duration_millis")]
    pub count: Duration,
    #[serde(with = "duration_millis")]
    pub write: Duration,
    /// Successful calls slower than this are logged at warn level.
    #[serde(with = "duration_millis")]
    pub slow_call: Duration,
}

impl Default for StoreBudgets {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            count: Duration::from_secs(5),
            write: Duration::from_secs(10),
            slow_call: Duration::from_millis(500),
        }
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Race `fut` against `budget`.
///
/// Elapsed budgets become `StorageError::Timeout { operation, budget }`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    budget: Duration,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::timeout(operation, budget)),
    }
}

/// A store wrapper that enforces [`StoreBudgets`] on an inner store.
pub struct TimedStore<S: DocumentStore> {
    inner: S,
    budgets: StoreBudgets,
}

impl<S: DocumentStore> TimedStore<S> {
    pub fn new(inner: S, budgets: StoreBudgets) -> Self {
        Self { inner, budgets }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn budgets(&self) -> &StoreBudgets {
        &self.budgets
    }

    async fn timed<T, F>(
        &self,
        operation: &'static str,
        collection: &str,
        budget: Duration,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let started = Instant::now();
        let result = with_timeout(operation, budget, fut).await;
        let elapsed = started.elapsed();
        match &result {
            Err(StorageError::Timeout { .. }) => warn!(
                backend = self.inner.backend_name(),
                operation,
                collection,
                budget_ms = budget.as_millis() as u64,
                "Store operation exceeded its budget"
            ),
            Ok(_) if elapsed > self.budgets.slow_call => warn!(
                backend = self.inner.backend_name(),
                operation,
                collection,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow store operation"
            ),
            _ => {}
        }
        result
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for TimedStore<S> {
    async fn aggregate_with_count(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<FindResult, StorageError> {
        self.timed(
            "aggregate",
            collection,
            self.budgets.read,
            self.inner.aggregate_with_count(collection, query),
        )
        .await
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StorageError> {
        self.timed(
            "find",
            collection,
            self.budgets.read,
            self.inner.find(collection, query),
        )
        .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.timed(
            "count",
            collection,
            self.budgets.count,
            self.inner.count(collection, filter),
        )
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.timed(
            "get",
            collection,
            self.budgets.read,
            self.inner.get(collection, id),
        )
        .await
    }

    async fn insert(&self, collection: &str, doc: Value) -> Result<(), StorageError> {
        self.timed(
            "insert",
            collection,
            self.budgets.write,
            self.inner.insert(collection, doc),
        )
        .await
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<(), StorageError> {
        self.timed(
            "replace",
            collection,
            self.budgets.write,
            self.inner.replace(collection, id, doc),
        )
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        self.timed(
            "delete",
            collection,
            self.budgets.write,
            self.inner.delete(collection, id),
        )
        .await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
