//! # catalog-server
//!
//! HTTP and WebSocket surface of the real-time catalog: listing reads through
//! the cached fallback query engine, the write path that invalidates caches
//! and broadcasts stock deltas, and the push transport.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod microcache;
pub mod middleware;
pub mod observability;
pub mod seed;
pub mod server;
pub mod state;
pub mod ws;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use microcache::{Microcache, MicrocacheStats};
pub use server::{CatalogServer, ServerBuilder, build_app, build_router};
pub use state::AppState;
