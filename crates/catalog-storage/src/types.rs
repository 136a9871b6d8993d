use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Filter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Which fields of each document the store returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Only these top-level fields, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    /// Top-level fields to drop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Array field whose inline binary entries (`data:` URIs) are replaced by `null`,
    /// keeping their positions so references can be substituted later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_inline_media: Option<String>,
}

impl Projection {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn include(fields: &[&str]) -> Self {
        Self {
            include: Some(fields.iter().map(|f| f.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn strip_media(mut self, field: impl Into<String>) -> Self {
        self.strip_inline_media = Some(field.into());
        self
    }

    /// Apply this projection to a document.
    pub fn apply(&self, doc: &Value) -> Value {
        let Some(obj) = doc.as_object() else {
            return doc.clone();
        };
        let mut out = serde_json::Map::new();
        for (k, v) in obj {
            if let Some(include) = &self.include
                && !include.iter().any(|f| f == k)
            {
                continue;
            }
            if self.exclude.iter().any(|f| f == k) {
                continue;
            }
            let value = match (&self.strip_inline_media, v) {
                (Some(field), Value::Array(items)) if field == k => Value::Array(
                    items
                        .iter()
                        .map(|item| match item.as_str() {
                            Some(s) if catalog_core::is_inline_media(s) => Value::Null,
                            _ => item.clone(),
                        })
                        .collect(),
                ),
                _ => v.clone(),
            };
            out.insert(k.clone(), value);
        }
        Value::Object(out)
    }
}

/// A filtered, sorted, paginated, projected read.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Vec<SortField>,
    pub skip: usize,
    pub limit: usize,
    pub projection: Projection,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: usize::MAX,
            projection: Projection::full(),
        }
    }

    pub fn with_sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Page of documents plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    pub documents: Vec<Value>,
    pub total: u64,
}
