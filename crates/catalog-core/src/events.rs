//! Push event types exchanged between the change notifier and connected clients.
//!
//! Every frame on the push transport is a JSON object of the form
//! `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::now_utc;

/// Optional metadata accompanying a stock change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

impl DeltaMeta {
    pub fn variant(key: impl Into<String>) -> Self {
        Self {
            variant_key: Some(key.into()),
            operation_id: None,
        }
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

/// A single stock change for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDelta {
    pub entity_id: String,
    pub new_quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_operation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl StockDelta {
    pub fn new(entity_id: impl Into<String>, new_quantity: i64, meta: DeltaMeta) -> Self {
        Self {
            entity_id: entity_id.into(),
            new_quantity,
            variant_key: meta.variant_key,
            originating_operation_id: meta.operation_id,
            timestamp: now_utc(),
        }
    }
}

/// One entry of a bulk stock update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub entity_id: String,
    pub new_quantity: i64,
    #[serde(flatten)]
    pub meta: DeltaMeta,
}

/// Payload of a `stockUpdate` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockUpdate {
    SingleProduct {
        #[serde(flatten)]
        delta: StockDelta,
    },
    BulkUpdate {
        updates: Vec<StockDelta>,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl StockUpdate {
    /// Flatten into the individual deltas carried by this update.
    pub fn into_deltas(self) -> Vec<StockDelta> {
        match self {
            StockUpdate::SingleProduct { delta } => vec![delta],
            StockUpdate::BulkUpdate { updates, .. } => updates,
        }
    }
}

/// Alert sent only to the privileged room when stock falls to or below a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub entity_id: String,
    pub new_quantity: i64,
    pub threshold: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// General notification delivered to every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339", default = "now_utc")]
    pub timestamp: OffsetDateTime,
}

/// Server-to-client push frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PushEvent {
    StockUpdate(StockUpdate),
    LowStockAlert(LowStockAlert),
    Notification(Notification),
    /// Answer to a client `ping`.
    Pong,
    /// Sent once after connecting.
    #[serde(rename_all = "camelCase")]
    Welcome { session_id: String },
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::StockUpdate(_) => "stockUpdate",
            PushEvent::LowStockAlert(_) => "lowStockAlert",
            PushEvent::Notification(_) => "notification",
            PushEvent::Pong => "pong",
            PushEvent::Welcome { .. } => "welcome",
        }
    }
}

/// Client-to-server command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientCommand {
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Ping,
}
