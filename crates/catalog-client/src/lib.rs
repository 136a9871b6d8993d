//! # catalog-client
//!
//! Client-side pipeline that keeps a local view of the catalog close to the
//! server without refetching on every change:
//!
//! - [`ClientCacheStore`]: query cache with an entity index
//! - [`ShadowStockStore`]: latest known stock per entity
//! - [`OptimisticApplier`]: patches both from pushed deltas
//! - [`ReconciliationScheduler`]: delayed authoritative re-fetch
//!
//! [`HttpCatalogFetcher`] and [`PushClient`] connect the pipeline to a running
//! catalog server.

pub mod applier;
pub mod cache_store;
pub mod error;
pub mod fetcher;
pub mod push;
pub mod reconcile;
pub mod shadow;

pub use applier::{ApplyOutcome, OptimisticApplier};
pub use cache_store::{ClientCacheStore, ClientQuery, EntrySnapshot, EntryState, QueryKind};
pub use error::ClientError;
pub use fetcher::HttpCatalogFetcher;
pub use push::PushClient;
pub use reconcile::{CatalogFetcher, ReconcileReport, ReconciliationScheduler};
pub use shadow::{ShadowChange, ShadowStockStore};
