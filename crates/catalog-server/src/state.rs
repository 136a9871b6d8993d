use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use catalog_core::SystemClock;
use catalog_notify::ChangeNotifier;
use catalog_query::engine::DEFAULT_COLLECTION;
use catalog_query::{
    FallbackChain, FallbackExecutor, ParamLimits, PathMediaResolver, QueryEngine, QueryResultCache,
};
use catalog_storage::{DynStore, FaultPlan, InMemoryStore, StoreOperation, TimedStore};

use crate::config::AppConfig;
use crate::microcache::Microcache;
use crate::seed;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: DynStore,
    /// Fault plan of the in-memory backend, for simulating a degraded store.
    pub faults: Arc<FaultPlan>,
    pub engine: Arc<QueryEngine>,
    pub notifier: Arc<ChangeNotifier>,
    pub microcache: Arc<Microcache>,
    pub media: Arc<PathMediaResolver>,
    pub param_limits: ParamLimits,
    pub max_document_bytes: usize,
    pub collection: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub async fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let backend = InMemoryStore::new().with_max_document_bytes(cfg.storage.max_document_bytes);
        let faults = backend.faults();

        let products = match &cfg.storage.seed_file {
            Some(path) => seed::load_seed_file(Path::new(path))?,
            None if cfg.storage.seed_demo => seed::demo_products(),
            None => Vec::new(),
        };
        seed::seed_store(&backend, DEFAULT_COLLECTION, products).await?;

        // Latency applies after seeding so startup stays fast.
        let latency = cfg.storage.simulated_latency();
        if !latency.is_zero() {
            for op in StoreOperation::ALL {
                faults.set_latency(op, latency);
            }
            tracing::warn!(
                latency_ms = cfg.storage.simulated_latency_ms,
                "Simulated store latency enabled"
            );
        }

        let store: DynStore = Arc::new(TimedStore::new(backend, cfg.storage.budgets));
        let media = Arc::new(PathMediaResolver::new(cfg.query.media_base_path.clone()));
        let chain = FallbackChain::standard(&cfg.query.budgets);
        let worst_case_query_ms = chain.total_budget().as_millis() as u64;
        let executor = FallbackExecutor::new(store.clone(), chain)
        .with_collection(DEFAULT_COLLECTION)
        .with_min_search_length(cfg.query.min_search_length)
        .with_media_resolver(media.clone());
        let cache = Arc::new(QueryResultCache::new(
            cfg.cache.capacity,
            cfg.cache.ttl(),
            SystemClock::shared(),
        ));

        tracing::info!(
            backend = store.backend_name(),
            cache_capacity = cfg.cache.capacity,
            cache_ttl_ms = cfg.cache.ttl_ms,
            worst_case_query_ms,
            microcache = cfg.microcache.enabled,
            "Application state initialized"
        );

        Ok(Self {
            store,
            faults,
            engine: Arc::new(QueryEngine::new(executor, cache)),
            notifier: Arc::new(ChangeNotifier::new(cfg.notifier.clone())),
            microcache: Arc::new(Microcache::from_config(&cfg.microcache)),
            media,
            param_limits: cfg.param_limits(),
            max_document_bytes: cfg.storage.max_document_bytes,
            collection: DEFAULT_COLLECTION,
            started_at: Instant::now(),
        })
    }
}
