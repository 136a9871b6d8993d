//! # catalog-storage
//!
//! Document store abstraction for the catalog service.
//!
//! The main trait is [`DocumentStore`]. Queries are expressed as a typed
//! [`Filter`] tree that each backend compiles at its own boundary, so no
//! backend-specific query syntax leaks into the query layer.
//!
//! Two implementations ship with the crate:
//! - [`InMemoryStore`], with a [`FaultPlan`] for simulating a degraded store
//! - [`TimedStore`], a decorator enforcing per-operation time budgets

mod error;
pub mod filter;
pub mod memory;
pub mod timed;
mod traits;
mod types;

use std::sync::Arc;

pub use error::{ErrorCategory, OVERSIZED_HINT, StorageError};
pub use filter::{Bound, CompiledFilter, Filter};
pub use memory::{DEFAULT_MAX_DOCUMENT_BYTES, FaultPlan, InMemoryStore, StoreOperation};
pub use timed::{StoreBudgets, TimedStore, duration_millis, with_timeout};
pub use traits::DocumentStore;
pub use types::{FindQuery, FindResult, Projection, SortDirection, SortField};

/// Shared, dynamically dispatched store handle.
pub type DynStore = Arc<dyn DocumentStore>;
