//! Query execution engine with a multi-stage fallback chain.
//!
//! A listing request runs through an ordered [`FallbackChain`]. The first stage
//! always runs; each later stage states when the chain advances into it:
//!
//! - [`AdvanceCondition::OnFailure`]: the previous attempt failed or timed out
//! - [`AdvanceCondition::OnEmptyEscalation`]: the previous attempt returned no rows
//!   and the query carries a search term long enough to escalate
//!
//! Every stage runs under its own budget. Validation errors end the chain
//! immediately. The [`QueryEngine`] puts the [`QueryResultCache`] in front of
//! the executor and serves stale entries when recomputation fails with a
//! retryable error.

use std::sync::Arc;
use std::time::Duration;

use catalog_core::{AttemptedStage, CatalogError};
use catalog_storage::{
    DynStore, Filter, FindQuery, Projection, StorageError, duration_millis, with_timeout,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, QueryResultCache};
use crate::media::{MediaResolver, PathMediaResolver, fill_media_placeholders};
use crate::spec::{Cursor, PageRequest, QuerySpec, SEARCH_FIELDS};

pub const DEFAULT_COLLECTION: &str = "products";
pub const DEFAULT_MIN_SEARCH_LENGTH: usize = 3;

/// Fields returned by the simplified scan.
pub const REDUCED_FIELDS: [&str; 5] = ["id", "name", "price", "quantity", "category"];

const STAGE_OUTCOMES_TOTAL: &str = "catalog_query_stage_outcomes_total";
const CACHE_LOOKUPS_TOTAL: &str = "catalog_cache_lookups_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Aggregation returning rows and total in one pass, with exact token search.
    Aggregate,
    /// Case-insensitive substring search over the searchable fields.
    SubstringSearch,
    /// Reduced projection, substring search on name only, no total.
    SimplifiedScan,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Aggregate => "aggregate",
            Strategy::SubstringSearch => "substringSearch",
            Strategy::SimplifiedScan => "simplifiedScan",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceCondition {
    OnFailure,
    OnEmptyEscalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackStage {
    pub strategy: Strategy,
    pub budget: Duration,
    /// Ignored for the first stage.
    pub advance: AdvanceCondition,
}

/// Per-stage time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryBudgets {
    #[serde(with = "duration_millis")]
    pub primary: Duration,
    #[serde(with = "duration_millis")]
    pub substring: Duration,
    #[serde(with = "duration_millis")]
    pub simplified: Duration,
}

impl Default for QueryBudgets {
    fn default() -> Self {
        Self {
            primary: Duration::from_secs(8),
            substring: Duration::from_secs(3),
            simplified: Duration::from_secs(2),
        }
    }
}

/// Ordered list of query stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    stages: Vec<FallbackStage>,
}

impl FallbackChain {
    pub fn new(stages: Vec<FallbackStage>) -> Self {
        Self { stages }
    }

    /// Aggregate, then substring search on empty escalation, then simplified scan on failure.
    pub fn standard(budgets: &QueryBudgets) -> Self {
        Self::new(vec![
            FallbackStage {
                strategy: Strategy::Aggregate,
                budget: budgets.primary,
                advance: AdvanceCondition::OnFailure,
            },
            FallbackStage {
                strategy: Strategy::SubstringSearch,
                budget: budgets.substring,
                advance: AdvanceCondition::OnEmptyEscalation,
            },
            FallbackStage {
                strategy: Strategy::SimplifiedScan,
                budget: budgets.simplified,
                advance: AdvanceCondition::OnFailure,
            },
        ])
    }

    pub fn stages(&self) -> &[FallbackStage] {
        &self.stages
    }

    /// Worst-case latency when every stage is attempted.
    pub fn total_budget(&self) -> Duration {
        self.stages.iter().map(|s| s.budget).sum()
    }
}

/// Rows produced by one successful stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRows {
    pub items: Vec<Value>,
    /// Total number of matches, when the strategy computes it.
    pub total: Option<u64>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub strategy: Strategy,
    pub rows: StageRows,
    pub attempted: Vec<AttemptedStage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Previous {
    Failed,
    Empty,
    None,
}

/// Runs a [`QuerySpec`] through a [`FallbackChain`] against a store.
pub struct FallbackExecutor {
    store: DynStore,
    chain: FallbackChain,
    collection: String,
    min_search_length: usize,
    media: Arc<dyn MediaResolver>,
}

impl FallbackExecutor {
    pub fn new(store: DynStore, chain: FallbackChain) -> Self {
        Self {
            store,
            chain,
            collection: DEFAULT_COLLECTION.to_string(),
            min_search_length: DEFAULT_MIN_SEARCH_LENGTH,
            media: Arc::new(PathMediaResolver::default()),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_min_search_length(mut self, len: usize) -> Self {
        self.min_search_length = len;
        self
    }

    pub fn with_media_resolver(mut self, media: Arc<dyn MediaResolver>) -> Self {
        self.media = media;
        self
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub async fn execute(&self, spec: &QuerySpec) -> Result<ExecutionOutcome, CatalogError> {
        let mut attempted: Vec<AttemptedStage> = Vec::new();
        let mut previous = Previous::None;
        let mut last_error: Option<StorageError> = None;
        let mut empty: Option<(Strategy, StageRows)> = None;

        for (index, stage) in self.chain.stages.iter().enumerate() {
            let eligible = index == 0
                || match (stage.advance, previous) {
                    (AdvanceCondition::OnFailure, Previous::Failed) => true,
                    (AdvanceCondition::OnEmptyEscalation, Previous::Empty) => {
                        spec.escalates(self.min_search_length)
                    }
                    _ => false,
                };
            if !eligible {
                debug!(strategy = %stage.strategy, "Skipping ineligible query stage");
                continue;
            }

            let started = Instant::now();
            let result = with_timeout(
                stage.strategy.as_str(),
                stage.budget,
                self.run_stage(stage.strategy, spec),
            )
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(rows) if rows.items.is_empty() => {
                    record_stage(stage.strategy, "empty");
                    debug!(strategy = %stage.strategy, elapsed_ms, "Query stage returned no rows");
                    attempted.push(AttemptedStage::new(stage.strategy.as_str(), "empty"));
                    previous = Previous::Empty;
                    empty = Some((stage.strategy, rows));
                }
                Ok(rows) => {
                    record_stage(stage.strategy, "success");
                    debug!(
                        strategy = %stage.strategy,
                        rows = rows.items.len(),
                        elapsed_ms,
                        "Query stage succeeded"
                    );
                    attempted.push(AttemptedStage::new(stage.strategy.as_str(), "success"));
                    return Ok(ExecutionOutcome {
                        strategy: stage.strategy,
                        rows,
                        attempted,
                    });
                }
                Err(err) if is_validation(&err) => {
                    record_stage(stage.strategy, "rejected");
                    return Err(err.into());
                }
                Err(err) => {
                    let outcome = if err.is_timeout() { "timeout" } else { "error" };
                    record_stage(stage.strategy, outcome);
                    warn!(
                        strategy = %stage.strategy,
                        budget_ms = stage.budget.as_millis() as u64,
                        elapsed_ms,
                        error = %err,
                        "Query stage failed"
                    );
                    attempted.push(AttemptedStage::new(stage.strategy.as_str(), outcome));
                    previous = Previous::Failed;
                    last_error = Some(err);
                }
            }
        }

        if let Some((strategy, rows)) = empty {
            return Ok(ExecutionOutcome {
                strategy,
                rows,
                attempted,
            });
        }

        match last_error {
            Some(err) if attempted.len() == 1 => Err(err.into()),
            Some(_) => Err(CatalogError::FallbackChainExhausted { attempted }),
            None => Err(CatalogError::internal("query fallback chain has no stages")),
        }
    }

    async fn run_stage(
        &self,
        strategy: Strategy,
        spec: &QuerySpec,
    ) -> Result<StageRows, StorageError> {
        let mut predicates = vec![spec.filter.clone()];
        if let Some(cursor) = spec.cursor_filter() {
            predicates.push(cursor);
        }
        if let Some(term) = spec.search.as_deref() {
            predicates.push(match strategy {
                Strategy::Aggregate => Filter::text(&SEARCH_FIELDS, term),
                Strategy::SubstringSearch => Filter::or(
                    SEARCH_FIELDS
                        .iter()
                        .map(|field| Filter::contains(*field, term))
                        .collect(),
                ),
                Strategy::SimplifiedScan => Filter::contains("name", term),
            });
        }

        let projection = match strategy {
            Strategy::SimplifiedScan => Projection::include(&REDUCED_FIELDS),
            _ if spec.include_images => Projection::full(),
            _ => Projection::full().strip_media("images"),
        };

        // One extra row tells whether another page exists.
        let query = FindQuery::new(Filter::and(predicates))
            .with_sort(vec![spec.sort.clone()])
            .with_skip(spec.skip())
            .with_limit(spec.limit + 1)
            .with_projection(projection);

        let (mut items, total) = match strategy {
            Strategy::SimplifiedScan => (self.store.find(&self.collection, &query).await?, None),
            _ => {
                let result = self
                    .store
                    .aggregate_with_count(&self.collection, &query)
                    .await?;
                (result.documents, Some(result.total))
            }
        };

        let has_more = items.len() > spec.limit;
        items.truncate(spec.limit);
        if strategy != Strategy::SimplifiedScan && !spec.include_images {
            for item in &mut items {
                fill_media_placeholders(item, self.media.as_ref());
            }
        }

        Ok(StageRows {
            items,
            total,
            has_more,
        })
    }
}

fn is_validation(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::InvalidQuery { .. } | StorageError::DocumentTooLarge { .. }
    )
}

fn record_stage(strategy: Strategy, outcome: &'static str) {
    counter!(
        STAGE_OUTCOMES_TOTAL,
        "strategy" => strategy.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

fn record_lookup(result: &'static str) {
    counter!(CACHE_LOOKUPS_TOTAL, "layer" => "query", "result" => result).increment(1);
}

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Pagination {
    Page {
        page: u32,
        limit: usize,
        /// `None` when the answering strategy does not count matches.
        total: Option<u64>,
        total_pages: Option<u64>,
        has_next: bool,
        has_prev: bool,
    },
    Cursor {
        limit: usize,
        next_cursor: Option<String>,
        has_more: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub cached: bool,
    pub stale: bool,
    pub strategy: Strategy,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<Value>,
    pub pagination: Pagination,
    pub performance: Performance,
}

impl ListResponse {
    fn from_outcome(spec: &QuerySpec, outcome: ExecutionOutcome, elapsed: Duration) -> Self {
        let rows = outcome.rows;
        let pagination = match spec.pagination {
            PageRequest::Page { page } => {
                let limit = spec.limit as u64;
                Pagination::Page {
                    page,
                    limit: spec.limit,
                    total: rows.total,
                    total_pages: rows.total.map(|t| t.div_ceil(limit.max(1))),
                    has_next: match rows.total {
                        Some(total) => u64::from(page) * limit < total,
                        None => rows.has_more,
                    },
                    has_prev: page > 1,
                }
            }
            PageRequest::Cursor { .. } => Pagination::Cursor {
                limit: spec.limit,
                next_cursor: if rows.has_more {
                    rows.items
                        .last()
                        .and_then(|item| item.get("id"))
                        .and_then(Value::as_str)
                        .map(|id| Cursor::new(id).encode())
                } else {
                    None
                },
                has_more: rows.has_more,
            },
        };
        Self {
            items: rows.items,
            pagination,
            performance: Performance {
                cached: false,
                stale: false,
                strategy: outcome.strategy,
                elapsed_ms: elapsed.as_millis() as u64,
            },
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Cached listing reads over a [`FallbackExecutor`].
pub struct QueryEngine {
    executor: FallbackExecutor,
    cache: Arc<QueryResultCache<ListResponse>>,
}

impl QueryEngine {
    pub fn new(executor: FallbackExecutor, cache: Arc<QueryResultCache<ListResponse>>) -> Self {
        Self { executor, cache }
    }

    pub fn cache(&self) -> &Arc<QueryResultCache<ListResponse>> {
        &self.cache
    }

    pub fn executor(&self) -> &FallbackExecutor {
        &self.executor
    }

    /// Drop every cached listing. Called after any catalog write.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub async fn list(&self, spec: &QuerySpec) -> Result<ListResponse, CatalogError> {
        let started = Instant::now();
        let key = spec.cache_key();

        let stale = match self.cache.get(&key) {
            CacheLookup::Fresh(mut hit) => {
                record_lookup("hit");
                hit.performance.cached = true;
                hit.performance.stale = false;
                hit.performance.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(hit);
            }
            CacheLookup::Stale(entry) => {
                record_lookup("stale");
                Some(entry)
            }
            CacheLookup::Miss => {
                record_lookup("miss");
                None
            }
        };

        match self.executor.execute(spec).await {
            Ok(outcome) => {
                let response = ListResponse::from_outcome(spec, outcome, started.elapsed());
                self.cache.set(key, response.clone());
                Ok(response)
            }
            Err(err) => match stale {
                Some(mut response) if serves_stale(&err) => {
                    warn!(error = %err, "Serving stale listing after failed recomputation");
                    response.performance.cached = true;
                    response.performance.stale = true;
                    response.performance.elapsed_ms = started.elapsed().as_millis() as u64;
                    Ok(response)
                }
                _ => Err(err),
            },
        }
    }
}

fn serves_stale(err: &CatalogError) -> bool {
    err.is_retryable() || matches!(err, CatalogError::FallbackChainExhausted { .. })
}
