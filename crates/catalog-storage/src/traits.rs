//! The document store contract consumed by the query engine and the write path.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::filter::Filter;
use crate::types::{FindQuery, FindResult};

/// Abstract document store.
///
/// Documents are JSON objects carrying a string `id` field that is unique per
/// collection. Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ==================== Reads ====================

    /// Aggregation-style read: one page of projected documents together with the
    /// total number of matches, computed in a single pass.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidQuery` if the filter cannot be compiled.
    async fn aggregate_with_count(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<FindResult, StorageError>;

    /// Plain cursor read without a total count.
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StorageError>;

    /// Number of documents matching `filter`.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError>;

    /// Reads a single document by id. Returns `None` if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError>;

    // ==================== Writes ====================

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` for a duplicate id and
    /// `StorageError::DocumentTooLarge` when the document exceeds the backend limit.
    async fn insert(&self, collection: &str, doc: Value) -> Result<(), StorageError>;

    /// Replaces an existing document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no document has this id.
    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<(), StorageError>;

    /// Deletes a document. Returns `false` if it did not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError>;

    // ==================== Metadata ====================

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
