//! Whole-response microcache for GET requests.
//!
//! Responses are captured as a side effect of serving a miss and replayed
//! verbatim for a short window. There is no single-flight: concurrent misses
//! for the same URL each run the handler and each overwrite the entry.
//!
//! A request carrying `Cache-Control: no-cache` skips the lookup and always
//! reaches its handler; its response still refreshes the entry.
//!
//! Entries expire lazily on lookup. When the entry bound is reached, expired
//! entries are swept; if the map is still full the new response is not stored.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use catalog_core::{DynClock, SystemClock};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::MicrocacheConfig;
use crate::metrics;

pub const MICROCACHE_HEADER: HeaderName = HeaderName::from_static("x-microcache");

/// Paths that always reach their handler.
const BYPASS_PATHS: [&str; 4] = ["/ws", "/metrics", "/healthz", "/readyz"];

struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
}

pub struct Microcache {
    entries: DashMap<u64, CachedResponse>,
    ttl: Duration,
    max_entries: usize,
    clock: DynClock,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrocacheStats {
    pub size: usize,
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

impl Microcache {
    pub fn new(ttl: Duration, max_entries: usize, clock: DynClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &MicrocacheConfig) -> Self {
        Self::new(cfg.ttl(), cfg.max_entries, SystemClock::shared())
    }

    /// Cache key for a request target (path plus query string).
    pub fn key(path_and_query: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path_and_query.hash(&mut hasher);
        hasher.finish()
    }

    fn lookup(&self, key: u64) -> Option<Response> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(&key) {
            if now.saturating_duration_since(entry.stored_at) < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut response = Response::new(Body::from(entry.body.clone()));
                *response.status_mut() = entry.status;
                *response.headers_mut() = entry.headers.clone();
                return Some(response);
            }
            drop(entry);
            self.entries.remove(&key);
        }
        self.record_miss();
        None
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn store(&self, key: u64, status: StatusCode, headers: HeaderMap, body: Bytes) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let removed = self.cleanup_expired();
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            if self.entries.len() >= self.max_entries {
                tracing::debug!(
                    max_entries = self.max_entries,
                    "Microcache at capacity, skipping insertion"
                );
                return;
            }
        }
        self.entries.insert(
            key,
            CachedResponse {
                status,
                headers,
                body,
                stored_at: self.clock.now(),
            },
        );
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> MicrocacheStats {
        MicrocacheStats {
            size: self.entries.len(),
            max_entries: self.max_entries,
            ttl_ms: self.ttl.as_millis() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn bypasses(req: &Request) -> bool {
    if req.method() != Method::GET {
        return true;
    }
    if req.headers().contains_key(header::UPGRADE) {
        return true;
    }
    let path = req.uri().path();
    BYPASS_PATHS.contains(&path) || path.starts_with("/api/cache")
}

fn requests_revalidation(req: &Request) -> bool {
    req.headers()
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
}

/// Axum middleware serving and capturing cached GET responses.
pub async fn microcache_middleware(
    State(cache): State<Arc<Microcache>>,
    req: Request,
    next: Next,
) -> Response {
    if bypasses(&req) {
        return next.run(req).await;
    }

    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let key = Microcache::key(&target);

    if requests_revalidation(&req) {
        cache.record_miss();
    } else if let Some(mut cached) = cache.lookup(key) {
        metrics::record_microcache_lookup(true);
        cached
            .headers_mut()
            .insert(MICROCACHE_HEADER, HeaderValue::from_static("HIT"));
        return cached;
    }
    metrics::record_microcache_lookup(false);

    let response = next.run(req).await;
    if !response.status().is_success() {
        return with_miss_header(response);
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, uri = %target, "Failed to buffer response for microcache");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    cache.store(key, parts.status, parts.headers.clone(), bytes.clone());
    tracing::trace!(uri = %target, "Microcache stored response");

    with_miss_header(Response::from_parts(parts, Body::from(bytes)))
}

fn with_miss_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(MICROCACHE_HEADER, HeaderValue::from_static("MISS"));
    response
}
