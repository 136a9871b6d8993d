//! Shadow stock state: the latest known quantity per entity, independent of the
//! query cache lifecycle.
//!
//! Records are last-write-wins by arrival order. Event timestamps are not
//! compared, so a late reconciliation fetch overwrites an earlier delta and
//! vice versa.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A quantity change observed by the shadow store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowChange {
    pub entity_id: String,
    pub variant_key: Option<String>,
    pub quantity: i64,
}

#[derive(Debug)]
pub struct ShadowStockStore {
    records: RwLock<HashMap<(String, Option<String>), i64>>,
    changes: broadcast::Sender<ShadowChange>,
}

impl Default for ShadowStockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowStockStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Record a quantity. Returns the previous value, if any.
    pub fn record(&self, entity_id: &str, variant_key: Option<&str>, quantity: i64) -> Option<i64> {
        let previous = self.records.write().insert(
            (entity_id.to_string(), variant_key.map(str::to_string)),
            quantity,
        );
        if previous != Some(quantity) {
            // No subscribers is fine.
            let _ = self.changes.send(ShadowChange {
                entity_id: entity_id.to_string(),
                variant_key: variant_key.map(str::to_string),
                quantity,
            });
        }
        previous
    }

    /// Product-level quantity.
    pub fn get(&self, entity_id: &str) -> Option<i64> {
        self.records
            .read()
            .get(&(entity_id.to_string(), None))
            .copied()
    }

    pub fn get_variant(&self, entity_id: &str, variant_key: &str) -> Option<i64> {
        self.records
            .read()
            .get(&(entity_id.to_string(), Some(variant_key.to_string())))
            .copied()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShadowChange> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
