//! Core catalog types shared by the server, the query engine and the client pipeline.

pub mod clock;
pub mod error;
pub mod events;
pub mod id;
pub mod product;

pub use clock::{Clock, DynClock, ManualClock, SystemClock, now_utc};
pub use error::{AttemptedStage, CatalogError, ErrorCategory, Result};
pub use events::{
    ClientCommand, DeltaMeta, LowStockAlert, Notification, NotificationLevel, PushEvent,
    StockChange, StockDelta, StockUpdate,
};
pub use id::{IdError, generate_id, validate_id};
pub use product::{Product, ProductInput, Variant, is_inline_media};
