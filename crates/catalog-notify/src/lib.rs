//! # catalog-notify
//!
//! Push-based change notifier. Sessions register to obtain a bounded event
//! queue; stock changes, low-stock alerts and general notifications are fanned
//! out with at-most-once, non-blocking delivery.
//!
//! The notifier is process-local: a broadcast on one instance is never seen by
//! sessions registered with another.

pub mod error;
pub mod notifier;

pub use error::NotifyError;
pub use notifier::{
    ChangeNotifier, DEFAULT_LOW_STOCK_THRESHOLD, DEFAULT_PRIVILEGED_ROOM, DeliveryReport,
    NotifierConfig, NotifierStatsSnapshot, SessionHandle,
};
