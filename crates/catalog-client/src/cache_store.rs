//! Client-side query cache.
//!
//! Entries are keyed by a canonical query key and move through
//! `Empty -> Populated -> Stale -> Evicted`. An index from entity id to the keys
//! whose data mention that entity is maintained on every write, so a stock
//! delta patches exactly the affected entries without scanning the cache.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use catalog_core::{DynClock, SystemClock};
use parking_lot::RwLock;
use serde_json::Value;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    List,
    Detail,
}

/// A cacheable read: a listing query string or a product detail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientQuery {
    /// Listing query string with parameters in canonical (sorted) order.
    List { query: String },
    Detail { id: String },
}

impl ClientQuery {
    /// Listing query; parameter order and empty values do not matter.
    pub fn list(raw_query: &str) -> Self {
        let mut pairs: Vec<(String, String)> =
            url::form_urlencoded::parse(raw_query.trim_start_matches('?').as_bytes())
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self::List { query }
    }

    pub fn detail(id: impl Into<String>) -> Self {
        Self::Detail { id: id.into() }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            Self::List { .. } => QueryKind::List,
            Self::Detail { .. } => QueryKind::Detail,
        }
    }

    pub fn key(&self) -> String {
        match self {
            Self::List { query } => format!("list:{query}"),
            Self::Detail { id } => format!("detail:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Observed but never fetched.
    Empty,
    Populated,
    /// Older than `stale_time`; still served and still patched.
    Stale,
}

/// A cache entry as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub query: ClientQuery,
    pub data: Option<Value>,
    pub state: EntryState,
    pub observers: usize,
}

#[derive(Debug)]
struct Entry {
    query: ClientQuery,
    data: Option<Value>,
    fetched_at: Option<Instant>,
    observers: usize,
    unobserved_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    by_entity: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn unindex(&mut self, key: &str, data: Option<&Value>) {
        for id in data.map(entity_ids).unwrap_or_default() {
            if let Some(keys) = self.by_entity.get_mut(&id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_entity.remove(&id);
                }
            }
        }
    }

    fn index(&mut self, key: &str, data: &Value) {
        for id in entity_ids(data) {
            self.by_entity
                .entry(id)
                .or_default()
                .insert(key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.unindex(key, entry.data.as_ref());
                true
            }
            None => false,
        }
    }
}

/// Entity ids mentioned by a list (`items[].id`) or detail (`id`) payload.
pub fn entity_ids(data: &Value) -> Vec<String> {
    match data.get("items").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        None => data
            .get("id")
            .and_then(Value::as_str)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
    }
}

#[derive(Debug)]
pub struct ClientCacheStore {
    inner: RwLock<Inner>,
    clock: DynClock,
    stale_time: Duration,
    gc_time: Duration,
}

impl Default for ClientCacheStore {
    fn default() -> Self {
        Self::new(SystemClock::shared(), DEFAULT_STALE_TIME, DEFAULT_GC_TIME)
    }
}

impl ClientCacheStore {
    pub fn new(clock: DynClock, stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            stale_time,
            gc_time,
        }
    }

    /// Store fetched data, keeping the entry's observers.
    pub fn set(&self, query: &ClientQuery, data: Value) {
        let key = query.key();
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let previous = inner.entries.remove(&key);
        let (observers, unobserved_at) = match &previous {
            Some(entry) => {
                inner.unindex(&key, entry.data.as_ref());
                (entry.observers, entry.unobserved_at)
            }
            None => (0, Some(now)),
        };
        inner.index(&key, &data);
        inner.entries.insert(
            key,
            Entry {
                query: query.clone(),
                data: Some(data),
                fetched_at: Some(now),
                observers,
                unobserved_at,
            },
        );
    }

    pub fn get(&self, query: &ClientQuery) -> Option<EntrySnapshot> {
        let now = self.clock.now();
        let inner = self.inner.read();
        inner.entries.get(&query.key()).map(|entry| EntrySnapshot {
            query: entry.query.clone(),
            data: entry.data.clone(),
            state: self.state_of(entry, now),
            observers: entry.observers,
        })
    }

    pub fn data(&self, query: &ClientQuery) -> Option<Value> {
        self.get(query).and_then(|snapshot| snapshot.data)
    }

    pub fn remove(&self, query: &ClientQuery) -> bool {
        self.inner.write().remove(&query.key())
    }

    /// Register interest in a query, creating an empty entry if needed.
    pub fn observe(&self, query: &ClientQuery) {
        let mut inner = self.inner.write();
        let entry = inner.entries.entry(query.key()).or_insert_with(|| Entry {
            query: query.clone(),
            data: None,
            fetched_at: None,
            observers: 0,
            unobserved_at: None,
        });
        entry.observers += 1;
        entry.unobserved_at = None;
    }

    pub fn unobserve(&self, query: &ClientQuery) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(&query.key()) {
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.unobserved_at = Some(now);
            }
        }
    }

    /// Queries with at least one observer.
    pub fn active_queries(&self) -> Vec<ClientQuery> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.observers > 0)
            .map(|e| e.query.clone())
            .collect()
    }

    /// Queries whose data mention `entity_id`.
    pub fn queries_for_entity(&self, entity_id: &str) -> Vec<ClientQuery> {
        let inner = self.inner.read();
        inner
            .by_entity
            .get(entity_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| inner.entries.get(k))
                    .map(|e| e.query.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set the stock of `entity_id` in every entry that mentions it.
    ///
    /// With a variant key only the matching variant is patched. Entries are not
    /// re-checked against their original filters. Returns the number of entries
    /// changed.
    pub fn patch_quantity(
        &self,
        entity_id: &str,
        new_quantity: i64,
        variant_key: Option<&str>,
    ) -> usize {
        let mut inner = self.inner.write();
        let keys: Vec<String> = inner
            .by_entity
            .get(entity_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        let mut patched = 0;
        for key in keys {
            let Some(data) = inner.entries.get_mut(&key).and_then(|e| e.data.as_mut()) else {
                continue;
            };
            let changed = match data.get_mut("items").and_then(Value::as_array_mut) {
                Some(items) => items
                    .iter_mut()
                    .filter(|item| item.get("id").and_then(Value::as_str) == Some(entity_id))
                    .fold(false, |acc, item| {
                        patch_item(item, new_quantity, variant_key) || acc
                    }),
                None => patch_item(data, new_quantity, variant_key),
            };
            if changed {
                patched += 1;
            }
        }
        patched
    }

    /// Drop unobserved entries idle for longer than `gc_time`.
    pub fn gc(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| {
                e.observers == 0
                    && e
                        .unobserved_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= self.gc_time)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "Collected idle client cache entries");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state_of(&self, entry: &Entry, now: Instant) -> EntryState {
        match entry.fetched_at {
            None => EntryState::Empty,
            Some(at) if now.saturating_duration_since(at) > self.stale_time => EntryState::Stale,
            Some(_) => EntryState::Populated,
        }
    }
}

fn patch_item(item: &mut Value, new_quantity: i64, variant_key: Option<&str>) -> bool {
    match variant_key {
        None => match item.get_mut("quantity") {
            Some(quantity) => {
                *quantity = Value::from(new_quantity);
                true
            }
            None => false,
        },
        Some(key) => {
            let variant = item
                .get_mut("variants")
                .and_then(Value::as_array_mut)
                .and_then(|variants| {
                    variants
                        .iter_mut()
                        .find(|v| v.get("key").and_then(Value::as_str) == Some(key))
                });
            match variant {
                Some(variant) => {
                    variant["quantity"] = Value::from(new_quantity);
                    true
                }
                None => false,
            }
        }
    }
}
