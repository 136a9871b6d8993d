//! Change notifier: fans stock deltas and notifications out to connected sessions.
//!
//! Each session owns a bounded outbound queue. Delivery uses `try_send`, so a
//! broadcast never waits on a slow client: events that do not fit are dropped
//! and counted. There is no replay buffer, and the notifier only knows the
//! sessions registered with this instance.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use catalog_core::{
    DeltaMeta, LowStockAlert, Notification, PushEvent, StockChange, StockDelta, StockUpdate,
    generate_id, now_utc,
};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::error::{NotifyError, Result};

pub const DEFAULT_PRIVILEGED_ROOM: &str = "operators";
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;
pub const DEFAULT_SESSION_QUEUE: usize = 64;
pub const MAX_ROOM_NAME_LEN: usize = 64;

const PUSH_FRAMES_TOTAL: &str = "catalog_push_frames_total";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Broadcast quantities at or below this raise a low-stock alert.
    pub low_stock_threshold: i64,
    /// Room receiving low-stock alerts.
    pub privileged_room: String,
    /// Capacity of each session's outbound queue.
    pub session_queue: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            privileged_room: DEFAULT_PRIVILEGED_ROOM.to_string(),
            session_queue: DEFAULT_SESSION_QUEUE,
        }
    }
}

/// Frames delivered and dropped by one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

/// Receiving side of a registered session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub events: mpsc::Receiver<PushEvent>,
}

#[derive(Debug)]
struct Session {
    sender: mpsc::Sender<PushEvent>,
    rooms: HashSet<String>,
}

#[derive(Debug, Default)]
struct NotifierStats {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    low_stock_alerts: AtomicU64,
}

/// Point-in-time notifier statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierStatsSnapshot {
    pub sessions: usize,
    pub broadcasts: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub low_stock_alerts: u64,
}

#[derive(Debug)]
pub struct ChangeNotifier {
    config: NotifierConfig,
    sessions: RwLock<HashMap<String, Session>>,
    stats: NotifierStats,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(NotifierConfig::default())
    }
}

impl ChangeNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            stats: NotifierStats::default(),
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Register a new session. The first queued frame is a `welcome` event.
    pub fn register(&self) -> SessionHandle {
        let id = generate_id();
        let (sender, events) = mpsc::channel(self.config.session_queue.max(1));
        let _ = sender.try_send(PushEvent::Welcome {
            session_id: id.clone(),
        });
        self.sessions.write().insert(
            id.clone(),
            Session {
                sender,
                rooms: HashSet::new(),
            },
        );
        debug!(session_id = %id, "Push session registered");
        SessionHandle { id, events }
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "Push session unregistered");
        }
        removed
    }

    pub fn join_room(&self, session_id: &str, room: &str) -> Result<()> {
        validate_room(room)?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| NotifyError::SessionNotFound(session_id.to_string()))?;
        if session.rooms.insert(room.to_string()) {
            info!(session_id = %session_id, room = %room, "Session joined room");
        }
        Ok(())
    }

    pub fn leave_room(&self, session_id: &str, room: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| NotifyError::SessionNotFound(session_id.to_string()))?;
        session.rooms.remove(room);
        Ok(())
    }

    pub fn rooms_of(&self, session_id: &str) -> Vec<String> {
        let sessions = self.sessions.read();
        let mut rooms: Vec<String> = sessions
            .get(session_id)
            .map(|s| s.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.rooms.contains(room))
            .count()
    }

    /// Queue a frame for one session.
    pub fn send_to(&self, session_id: &str, event: PushEvent) -> Result<()> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| NotifyError::SessionNotFound(session_id.to_string()))?;
        session.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull(session_id.to_string()),
            TrySendError::Closed(_) => NotifyError::SessionClosed(session_id.to_string()),
        })
    }

    /// Broadcast a stock change for one entity.
    pub fn broadcast_single(
        &self,
        entity_id: &str,
        new_quantity: i64,
        meta: DeltaMeta,
    ) -> DeliveryReport {
        let delta = StockDelta::new(entity_id, new_quantity, meta);
        let mut report = self.deliver(
            PushEvent::StockUpdate(StockUpdate::SingleProduct { delta }),
            None,
        );
        report.merge(self.alert_if_low(entity_id, new_quantity));
        self.record_broadcast(report);
        report
    }

    /// Broadcast several stock changes as one `bulk_update` frame.
    pub fn broadcast_bulk(&self, changes: Vec<StockChange>) -> DeliveryReport {
        if changes.is_empty() {
            return DeliveryReport::default();
        }
        let low: Vec<(String, i64)> = changes
            .iter()
            .filter(|c| c.new_quantity <= self.config.low_stock_threshold)
            .map(|c| (c.entity_id.clone(), c.new_quantity))
            .collect();
        let updates = changes
            .into_iter()
            .map(|c| StockDelta::new(c.entity_id, c.new_quantity, c.meta))
            .collect();
        let mut report = self.deliver(
            PushEvent::StockUpdate(StockUpdate::BulkUpdate {
                updates,
                timestamp: now_utc(),
            }),
            None,
        );
        for (entity_id, quantity) in low {
            report.merge(self.alert_if_low(&entity_id, quantity));
        }
        self.record_broadcast(report);
        report
    }

    /// Deliver a general notification to every session.
    pub fn notify(&self, notification: Notification) -> DeliveryReport {
        let report = self.deliver(PushEvent::Notification(notification), None);
        self.record_broadcast(report);
        report
    }

    pub fn stats(&self) -> NotifierStatsSnapshot {
        NotifierStatsSnapshot {
            sessions: self.session_count(),
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            low_stock_alerts: self.stats.low_stock_alerts.load(Ordering::Relaxed),
        }
    }

    fn alert_if_low(&self, entity_id: &str, new_quantity: i64) -> DeliveryReport {
        if new_quantity > self.config.low_stock_threshold {
            return DeliveryReport::default();
        }
        self.stats.low_stock_alerts.fetch_add(1, Ordering::Relaxed);
        let alert = LowStockAlert {
            entity_id: entity_id.to_string(),
            new_quantity,
            threshold: self.config.low_stock_threshold,
            timestamp: now_utc(),
        };
        self.deliver(
            PushEvent::LowStockAlert(alert),
            Some(&self.config.privileged_room),
        )
    }

    fn deliver(&self, event: PushEvent, room: Option<&str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, session) in sessions.iter() {
                if let Some(room) = room
                    && !session.rooms.contains(room)
                {
                    continue;
                }
                match session.sender.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(session_id = %id, event = event.name(), "Outbound queue full, dropping frame");
                        report.dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.dropped += 1;
                        closed.push(id.clone());
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &closed {
                sessions.remove(id);
            }
            debug!(pruned = closed.len(), "Pruned closed push sessions");
        }

        counter!(PUSH_FRAMES_TOTAL, "event" => event.name(), "result" => "delivered")
            .increment(report.delivered as u64);
        counter!(PUSH_FRAMES_TOTAL, "event" => event.name(), "result" => "dropped")
            .increment(report.dropped as u64);
        report
    }

    fn record_broadcast(&self, report: DeliveryReport) {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }
}

fn validate_room(room: &str) -> Result<()> {
    let invalid = |reason| NotifyError::InvalidRoom {
        room: room.to_string(),
        reason,
    };
    if room.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if room.len() > MAX_ROOM_NAME_LEN {
        return Err(invalid("too long"));
    }
    if !room
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
    {
        return Err(invalid("only ASCII letters, digits, '-', '_' and ':' are allowed"));
    }
    Ok(())
}
