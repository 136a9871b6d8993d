//! Optimistic application of pushed stock deltas.
//!
//! A delta is applied synchronously: every cached entry that mentions the
//! entity is patched in place, then the shadow store is updated. Afterwards one
//! reconciliation per update is scheduled so the authoritative store gets the
//! last word.

use std::collections::HashSet;
use std::sync::Arc;

use catalog_core::{PushEvent, StockDelta, StockUpdate};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache_store::ClientCacheStore;
use crate::reconcile::{ReconcileReport, ReconciliationScheduler};
use crate::shadow::ShadowStockStore;

/// What applying one update did.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Cache entries changed across all deltas.
    pub patched_entries: usize,
    /// Reconciliation covering every entity of the update, when a scheduler
    /// is attached.
    pub reconciliation: Option<JoinHandle<ReconcileReport>>,
}

pub struct OptimisticApplier {
    cache: Arc<ClientCacheStore>,
    shadow: Arc<ShadowStockStore>,
    scheduler: Option<ReconciliationScheduler>,
}

impl OptimisticApplier {
    pub fn new(cache: Arc<ClientCacheStore>, shadow: Arc<ShadowStockStore>) -> Self {
        Self {
            cache,
            shadow,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: ReconciliationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn cache(&self) -> &Arc<ClientCacheStore> {
        &self.cache
    }

    pub fn shadow(&self) -> &Arc<ShadowStockStore> {
        &self.shadow
    }

    /// Patch cache and shadow state for one delta. Safe to reapply.
    pub fn apply_delta(&self, delta: &StockDelta) -> usize {
        let patched = self.cache.patch_quantity(
            &delta.entity_id,
            delta.new_quantity,
            delta.variant_key.as_deref(),
        );
        self.shadow.record(
            &delta.entity_id,
            delta.variant_key.as_deref(),
            delta.new_quantity,
        );
        debug!(
            entity_id = %delta.entity_id,
            quantity = delta.new_quantity,
            patched,
            "Applied optimistic stock delta"
        );
        patched
    }

    /// Apply every delta of an update, then schedule one reconciliation for
    /// all of its entities.
    pub fn apply_update(&self, update: StockUpdate) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut entities: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for delta in update.into_deltas() {
            outcome.patched_entries += self.apply_delta(&delta);
            if seen.insert(delta.entity_id.clone()) {
                entities.push(delta.entity_id);
            }
        }
        if let Some(scheduler) = &self.scheduler {
            outcome.reconciliation = Some(scheduler.schedule_many(entities));
        }
        outcome
    }

    /// Handle a push frame. Frames other than stock updates are ignored.
    pub fn apply_event(&self, event: PushEvent) -> Option<ApplyOutcome> {
        match event {
            PushEvent::StockUpdate(update) => Some(self.apply_update(update)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::ClientQuery;
    use crate::error::Result;
    use crate::reconcile::CatalogFetcher;
    use async_trait::async_trait;
    use catalog_core::DeltaMeta;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::time::Duration;

    /// Serves the authoritative quantity and counts fetches.
    struct AuthoritativeFetcher {
        quantity: i64,
        fetches: Mutex<usize>,
    }

    #[async_trait]
    impl CatalogFetcher for AuthoritativeFetcher {
        async fn fetch_list(&self, _query: &str) -> Result<Value> {
            *self.fetches.lock() += 1;
            Ok(json!({"items": [{"id": "P", "quantity": self.quantity}, {"id": "Q", "quantity": 1}]}))
        }

        async fn fetch_detail(&self, id: &str) -> Result<Value> {
            *self.fetches.lock() += 1;
            Ok(json!({"id": id, "quantity": self.quantity}))
        }
    }

    fn lists() -> Vec<ClientQuery> {
        vec![
            ClientQuery::list("category=a"),
            ClientQuery::list("category=b"),
            ClientQuery::list("search=shoe"),
        ]
    }

    fn populated_cache() -> Arc<ClientCacheStore> {
        let cache = Arc::new(ClientCacheStore::default());
        for (i, query) in lists().iter().enumerate() {
            cache.observe(query);
            cache.set(
                query,
                json!({"items": [{"id": format!("other-{i}"), "quantity": 8}, {"id": "P", "quantity": 10}]}),
            );
        }
        cache
    }

    fn quantity_in(cache: &ClientCacheStore, query: &ClientQuery) -> i64 {
        let data = cache.data(query).unwrap();
        data["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|item| item["id"] == "P")
            .and_then(|item| item["quantity"].as_i64())
            .unwrap()
    }

    fn single(entity_id: &str, quantity: i64) -> StockUpdate {
        StockUpdate::SingleProduct {
            delta: StockDelta::new(entity_id, quantity, DeltaMeta::default()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_patches_every_cached_list_without_fetching() {
        let cache = populated_cache();
        let shadow = Arc::new(ShadowStockStore::new());
        let fetcher = Arc::new(AuthoritativeFetcher {
            quantity: 3,
            fetches: Mutex::new(0),
        });
        let applier = OptimisticApplier::new(cache.clone(), shadow.clone()).with_scheduler(
            ReconciliationScheduler::new(cache.clone(), shadow.clone(), fetcher.clone()),
        );

        let outcome = applier.apply_update(single("P", 3));
        assert_eq!(outcome.patched_entries, 3);
        for query in lists() {
            assert_eq!(quantity_in(&cache, &query), 3);
        }
        assert_eq!(shadow.get("P"), Some(3));
        // Reconciliation is still pending.
        assert_eq!(*fetcher.fetches.lock(), 0);
        assert_eq!(cache.data(&lists()[0]).unwrap()["items"][0]["quantity"], 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_converges_to_authoritative_value() {
        let cache = populated_cache();
        let shadow = Arc::new(ShadowStockStore::new());
        let fetcher = Arc::new(AuthoritativeFetcher {
            quantity: 7,
            fetches: Mutex::new(0),
        });
        let applier = OptimisticApplier::new(cache.clone(), shadow.clone()).with_scheduler(
            ReconciliationScheduler::new(cache.clone(), shadow.clone(), fetcher.clone())
                .with_delay(Duration::from_secs(1)),
        );

        let outcome = applier.apply_update(single("P", 2));
        assert_eq!(shadow.get("P"), Some(2));
        assert_eq!(quantity_in(&cache, &lists()[1]), 2);

        let report = outcome.reconciliation.unwrap().await.unwrap();
        assert_eq!(report.lists_refreshed, 3);
        for query in lists() {
            assert_eq!(quantity_in(&cache, &query), 7);
        }
        assert_eq!(cache.data(&ClientQuery::detail("P")).unwrap()["quantity"], 7);
        assert_eq!(shadow.get("P"), Some(7));
        assert_eq!(*fetcher.fetches.lock(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_update_refetches_active_lists_once() {
        let cache = Arc::new(ClientCacheStore::default());
        let active = [ClientQuery::list("category=a"), ClientQuery::list("category=b")];
        for query in &active {
            cache.observe(query);
            cache.set(
                query,
                json!({"items": [{"id": "P", "quantity": 10}, {"id": "Q", "quantity": 4}]}),
            );
        }
        let shadow = Arc::new(ShadowStockStore::new());
        let fetcher = Arc::new(AuthoritativeFetcher {
            quantity: 6,
            fetches: Mutex::new(0),
        });
        let applier = OptimisticApplier::new(cache.clone(), shadow.clone()).with_scheduler(
            ReconciliationScheduler::new(cache.clone(), shadow.clone(), fetcher.clone()),
        );

        let bulk = StockUpdate::BulkUpdate {
            updates: vec![
                StockDelta::new("P", 1, DeltaMeta::default()),
                StockDelta::new("Q", 2, DeltaMeta::default()),
                StockDelta::new("R", 3, DeltaMeta::default()),
                StockDelta::new("P", 0, DeltaMeta::default()),
            ],
            timestamp: catalog_core::now_utc(),
        };
        let report = applier
            .apply_update(bulk)
            .reconciliation
            .unwrap()
            .await
            .unwrap();

        assert_eq!(report.details_refreshed, 3);
        assert_eq!(report.lists_refreshed, 2);
        // Three detail fetches plus one fetch per active list.
        assert_eq!(*fetcher.fetches.lock(), 5);
        assert_eq!(quantity_in(&cache, &active[1]), 6);
    }

    #[test]
    fn test_reapplying_is_idempotent() {
        let cache = populated_cache();
        let shadow = Arc::new(ShadowStockStore::new());
        let applier = OptimisticApplier::new(cache.clone(), shadow.clone());
        let delta = StockDelta::new("P", 5, DeltaMeta::default());
        applier.apply_delta(&delta);
        applier.apply_delta(&delta);
        assert_eq!(quantity_in(&cache, &lists()[2]), 5);
        assert_eq!(shadow.get("P"), Some(5));
    }

    #[test]
    fn test_bulk_update_and_unrelated_events() {
        let cache = populated_cache();
        let shadow = Arc::new(ShadowStockStore::new());
        let applier = OptimisticApplier::new(cache.clone(), shadow.clone());

        let bulk = StockUpdate::BulkUpdate {
            updates: vec![
                StockDelta::new("P", 1, DeltaMeta::default()),
                StockDelta::new("other-0", 0, DeltaMeta::default()),
            ],
            timestamp: catalog_core::now_utc(),
        };
        let outcome = applier.apply_event(PushEvent::StockUpdate(bulk)).unwrap();
        assert_eq!(outcome.patched_entries, 4);
        assert!(outcome.reconciliation.is_none());
        assert_eq!(shadow.get("other-0"), Some(0));

        assert!(applier.apply_event(PushEvent::Pong).is_none());
    }

    #[test]
    fn test_entity_without_cached_entries_still_updates_shadow() {
        let cache = Arc::new(ClientCacheStore::default());
        let shadow = Arc::new(ShadowStockStore::new());
        let applier = OptimisticApplier::new(cache, shadow.clone());
        let patched = applier.apply_delta(&StockDelta::new("ghost", 4, DeltaMeta::default()));
        assert_eq!(patched, 0);
        assert_eq!(shadow.get("ghost"), Some(4));
    }
}
