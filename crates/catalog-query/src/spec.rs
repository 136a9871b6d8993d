//! Typed query signature of a listing request.
//!
//! A [`QuerySpec`] is what the cache keys on and what every fallback stage
//! compiles into a store query. Building it from [`ListParams`] normalizes the
//! request, so two raw query strings that differ only in parameter order or
//! ignored parameters produce the same spec and the same cache key.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use catalog_storage::{Bound, Filter, SortDirection, SortField};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::params::{ListParams, ListParamsError, SortKey};

/// Fields covered by product search.
pub const SEARCH_FIELDS: [&str; 3] = ["name", "description", "category"];

/// Opaque continuation token for id-sorted listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Id of the last item of the previous page.
    pub after: String,
}

impl Cursor {
    pub fn new(after: impl Into<String>) -> Self {
        Self {
            after: after.into(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct with a single string field cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ListParamsError> {
        let invalid = || ListParamsError::InvalidValue {
            param: "cursor",
            value: token.to_string(),
            expected: "a cursor returned by a previous response".to_string(),
        };
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// Page- or cursor-based pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PageRequest {
    Page { page: u32 },
    Cursor { after: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Visibility and attribute predicates, excluding the search term.
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub sort: SortField,
    pub pagination: PageRequest,
    pub limit: usize,
    pub include_images: bool,
}

impl QuerySpec {
    pub fn from_params(params: &ListParams) -> Result<Self, ListParamsError> {
        params.validate()?;

        let mut predicates = vec![
            Filter::eq("isActive", true),
            Filter::eq("isArchived", false),
        ];
        if let Some(category) = &params.category {
            predicates.push(Filter::eq("category", category.as_str()));
        }
        if params.min_price.is_some() || params.max_price.is_some() {
            predicates.push(Filter::range(
                "price",
                params.min_price.map(Bound::inclusive),
                params.max_price.map(Bound::inclusive),
            ));
        }
        match params.in_stock {
            Some(true) => predicates.push(Filter::gt("quantity", 0)),
            Some(false) => predicates.push(Filter::range(
                "quantity",
                None,
                Some(Bound::inclusive(0)),
            )),
            None => {}
        }

        let pagination = if params.uses_cursor() {
            let after = match &params.cursor {
                Some(token) => Some(Cursor::decode(token)?.after),
                None => None,
            };
            PageRequest::Cursor { after }
        } else {
            PageRequest::Page {
                page: params.page.unwrap_or(1),
            }
        };

        Ok(Self {
            filter: Filter::and(predicates),
            search: params
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            sort: SortField {
                field: params.sort_by.field().to_string(),
                direction: params.sort_order,
            },
            pagination,
            limit: params.limit,
            include_images: params.include_images,
        })
    }

    /// Canonical cache key: this query rendered as JSON with object keys sorted.
    pub fn cache_key(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        format!("products:{}", canonical_json(&value))
    }

    /// Whether an empty exact-match result should escalate to substring search.
    pub fn escalates(&self, min_search_length: usize) -> bool {
        self.search
            .as_deref()
            .is_some_and(|term| term.chars().count() >= min_search_length)
    }

    /// Predicate restricting results to ids after the cursor, if any.
    pub fn cursor_filter(&self) -> Option<Filter> {
        match &self.pagination {
            PageRequest::Cursor { after: Some(after) } => Some(match self.sort.direction {
                SortDirection::Asc => Filter::gt(SortKey::Id.field(), after.as_str()),
                SortDirection::Desc => Filter::lt(SortKey::Id.field(), after.as_str()),
            }),
            _ => None,
        }
    }

    /// Documents to skip for page-based pagination.
    pub fn skip(&self) -> usize {
        match self.pagination {
            PageRequest::Page { page } => (page.saturating_sub(1) as usize) * self.limit,
            PageRequest::Cursor { .. } => 0,
        }
    }
}

/// Render JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for k in keys {
                    out.insert(k.clone(), sorted(&map[k]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
