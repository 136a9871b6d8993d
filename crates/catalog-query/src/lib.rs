//! Listing reads for the catalog: request parameters, the canonical query
//! signature, the query result cache and the fallback query engine.

pub mod cache;
pub mod engine;
pub mod media;
pub mod params;
pub mod spec;

pub use cache::{CacheLookup, CacheStatsSnapshot, QueryResultCache};
pub use engine::{
    AdvanceCondition, ExecutionOutcome, FallbackChain, FallbackExecutor, FallbackStage,
    ListResponse, Pagination, Performance, QueryBudgets, QueryEngine, StageRows, Strategy,
};
pub use media::{MediaResolver, PathMediaResolver};
pub use params::{ListParams, ListParamsError, ParamLimits, SortKey};
pub use spec::{Cursor, PageRequest, QuerySpec};
