//! Delayed authoritative re-fetches after optimistic patches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache_store::{ClientCacheStore, ClientQuery, QueryKind};
use crate::error::Result;
use crate::shadow::ShadowStockStore;

pub const DEFAULT_RECONCILE_DELAY: Duration = Duration::from_secs(1);

/// Source of authoritative catalog reads.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetch a listing envelope for a canonical query string.
    async fn fetch_list(&self, query: &str) -> Result<Value>;

    /// Fetch one product.
    async fn fetch_detail(&self, id: &str) -> Result<Value>;
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub details_refreshed: usize,
    pub lists_refreshed: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct ReconciliationScheduler {
    cache: Arc<ClientCacheStore>,
    shadow: Arc<ShadowStockStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    delay: Duration,
}

impl ReconciliationScheduler {
    pub fn new(
        cache: Arc<ClientCacheStore>,
        shadow: Arc<ShadowStockStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Self {
        Self {
            cache,
            shadow,
            fetcher,
            delay: DEFAULT_RECONCILE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Spawn a reconciliation for `entity_id` after the configured delay.
    pub fn schedule(&self, entity_id: &str) -> JoinHandle<ReconcileReport> {
        self.schedule_many(vec![entity_id.to_string()])
    }

    /// Spawn one reconciliation covering every entity of an update.
    pub fn schedule_many(&self, entity_ids: Vec<String>) -> JoinHandle<ReconcileReport> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.reconcile_now(&entity_ids).await
        })
    }

    /// Re-fetch the detail of each entity, then every active list query once.
    ///
    /// Fetch errors are logged and dropped; successful results overwrite the
    /// cache and the shadow store.
    pub async fn reconcile_now(&self, entity_ids: &[String]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let details = entity_ids.iter().map(|entity_id| async move {
            (entity_id, self.fetcher.fetch_detail(entity_id).await)
        });
        for (entity_id, result) in join_all(details).await {
            match result {
                Ok(data) => {
                    self.absorb(&ClientQuery::detail(entity_id.as_str()), data);
                    report.details_refreshed += 1;
                }
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Reconciliation detail fetch failed");
                    report.failures += 1;
                }
            }
        }

        let lists: Vec<ClientQuery> = self
            .cache
            .active_queries()
            .into_iter()
            .filter(|q| q.kind() == QueryKind::List)
            .collect();
        let fetches = lists.iter().map(|query| async move {
            let ClientQuery::List { query: raw } = query else {
                return None;
            };
            Some((query, self.fetcher.fetch_list(raw).await))
        });
        for (query, result) in join_all(fetches).await.into_iter().flatten() {
            match result {
                Ok(data) => {
                    self.absorb(query, data);
                    report.lists_refreshed += 1;
                }
                Err(e) => {
                    warn!(query = %query.key(), error = %e, "Reconciliation list fetch failed");
                    report.failures += 1;
                }
            }
        }

        debug!(
            entities = entity_ids.len(),
            lists = report.lists_refreshed,
            failures = report.failures,
            "Reconciliation finished"
        );
        report
    }

    fn absorb(&self, query: &ClientQuery, data: Value) {
        for (entity_id, variant_key, quantity) in stock_records(&data) {
            self.shadow
                .record(&entity_id, variant_key.as_deref(), quantity);
        }
        self.cache.set(query, data);
    }
}

/// `(entity, variant, quantity)` triples carried by a list or detail payload.
fn stock_records(data: &Value) -> Vec<(String, Option<String>, i64)> {
    let items: Vec<&Value> = match data.get("items").and_then(Value::as_array) {
        Some(items) => items.iter().collect(),
        None => vec![data],
    };
    let mut out = Vec::new();
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            continue;
        };
        if let Some(quantity) = item.get("quantity").and_then(Value::as_i64) {
            out.push((id.to_string(), None, quantity));
        }
        for variant in item
            .get("variants")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let (Some(key), Some(quantity)) = (
                variant.get("key").and_then(Value::as_str),
                variant.get("quantity").and_then(Value::as_i64),
            ) {
                out.push((id.to_string(), Some(key.to_string()), quantity));
            }
        }
    }
    out
}
