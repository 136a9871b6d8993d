//! Typed filter AST.
//!
//! Filters are built from request parameters as plain data, then compiled at the
//! store boundary: [`Filter::to_document`] renders the store's query document and
//! [`Filter::compile`] produces the matcher used by the in-memory backend.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::StorageError;

/// One side of a range predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// Predicate tree over JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Filter {
    Equals {
        field: String,
        value: Value,
    },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Bound>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Bound>,
    },
    RegexMatch {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    /// Whole-token match of any term word against the tokenized text of `fields`.
    TextSearch {
        fields: Vec<String>,
        term: String,
    },
    And {
        filters: Vec<Filter>,
    },
    Or {
        filters: Vec<Filter>,
    },
}

impl Filter {
    /// Filter matching every document.
    pub fn all() -> Self {
        Filter::And {
            filters: Vec::new(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, min: Option<Bound>, max: Option<Bound>) -> Self {
        Filter::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::range(field, Some(Bound::exclusive(value)), None)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::range(field, None, Some(Bound::exclusive(value)))
    }

    /// Case-insensitive literal substring match.
    pub fn contains(field: impl Into<String>, needle: &str) -> Self {
        Filter::RegexMatch {
            field: field.into(),
            pattern: regex::escape(needle),
            case_insensitive: true,
        }
    }

    pub fn text(fields: &[&str], term: impl Into<String>) -> Self {
        Filter::TextSearch {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            term: term.into(),
        }
    }

    /// Conjunction that drops empty `And` children and unwraps a single child.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut flat: Vec<Filter> = Vec::with_capacity(filters.len());
        for f in filters {
            match f {
                Filter::And { filters: inner } => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Filter::And { filters: flat }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            let mut filters = filters;
            return filters.remove(0);
        }
        Filter::Or { filters }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::And { filters } if filters.is_empty())
    }

    /// Returns `true` when the tree contains a text-search predicate.
    pub fn has_text_search(&self) -> bool {
        match self {
            Filter::TextSearch { .. } => true,
            Filter::And { filters } | Filter::Or { filters } => {
                filters.iter().any(Filter::has_text_search)
            }
            _ => false,
        }
    }

    /// Render as a document-store query document (`$and`/`$or`/`$regex`/`$text`).
    pub fn to_document(&self) -> Value {
        match self {
            Filter::Equals { field, value } => {
                let mut m = Map::new();
                m.insert(field.clone(), value.clone());
                Value::Object(m)
            }
            Filter::Range { field, min, max } => {
                let mut ops = Map::new();
                if let Some(b) = min {
                    let op = if b.inclusive { "$gte" } else { "$gt" };
                    ops.insert(op.to_string(), b.value.clone());
                }
                if let Some(b) = max {
                    let op = if b.inclusive { "$lte" } else { "$lt" };
                    ops.insert(op.to_string(), b.value.clone());
                }
                let mut m = Map::new();
                m.insert(field.clone(), Value::Object(ops));
                Value::Object(m)
            }
            Filter::RegexMatch {
                field,
                pattern,
                case_insensitive,
            } => {
                let options = if *case_insensitive { "i" } else { "" };
                let mut m = Map::new();
                m.insert(
                    field.clone(),
                    json!({ "$regex": pattern, "$options": options }),
                );
                Value::Object(m)
            }
            Filter::TextSearch { term, .. } => json!({ "$text": { "$search": term } }),
            Filter::And { filters } if filters.is_empty() => json!({}),
            Filter::And { filters } => {
                json!({ "$and": filters.iter().map(Filter::to_document).collect::<Vec<_>>() })
            }
            Filter::Or { filters } => {
                json!({ "$or": filters.iter().map(Filter::to_document).collect::<Vec<_>>() })
            }
        }
    }

    /// Compile into a matcher, validating regular expressions once.
    pub fn compile(&self) -> Result<CompiledFilter, StorageError> {
        Ok(CompiledFilter {
            node: compile_node(self)?,
        })
    }
}

fn compile_node(filter: &Filter) -> Result<Node, StorageError> {
    Ok(match filter {
        Filter::Equals { field, value } => Node::Equals {
            path: split_path(field),
            value: value.clone(),
        },
        Filter::Range { field, min, max } => Node::Range {
            path: split_path(field),
            min: min.clone(),
            max: max.clone(),
        },
        Filter::RegexMatch {
            field,
            pattern,
            case_insensitive,
        } => {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(*case_insensitive)
                .size_limit(1 << 20)
                .build()
                .map_err(|e| StorageError::invalid_query(format!("invalid regex: {e}")))?;
            Node::Regex {
                path: split_path(field),
                re,
            }
        }
        // A term with no words matches nothing.
        Filter::TextSearch { fields, term } => Node::Text {
            paths: fields.iter().map(|f| split_path(f)).collect(),
            tokens: tokenize(term),
        },
        Filter::And { filters } => {
            Node::And(filters.iter().map(compile_node).collect::<Result<_, _>>()?)
        }
        Filter::Or { filters } => {
            Node::Or(filters.iter().map(compile_node).collect::<Result<_, _>>()?)
        }
    })
}

/// Matcher produced by [`Filter::compile`].
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    node: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Equals {
        path: Vec<String>,
        value: Value,
    },
    Range {
        path: Vec<String>,
        min: Option<Bound>,
        max: Option<Bound>,
    },
    Regex {
        path: Vec<String>,
        re: Regex,
    },
    Text {
        paths: Vec<Vec<String>>,
        tokens: Vec<String>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl CompiledFilter {
    pub fn matches(&self, doc: &Value) -> bool {
        self.node.matches(doc)
    }
}

impl Node {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Node::Equals { path, value } => {
                any_value(get_path(doc, path), |v| values_equal(v, value))
            }
            Node::Range { path, min, max } => any_value(get_path(doc, path), |v| {
                let above = min.as_ref().is_none_or(|b| match compare_values(v, &b.value) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => b.inclusive,
                    _ => false,
                });
                let below = max.as_ref().is_none_or(|b| match compare_values(v, &b.value) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => b.inclusive,
                    _ => false,
                });
                above && below
            }),
            Node::Regex { path, re } => any_value(get_path(doc, path), |v| {
                v.as_str().is_some_and(|s| re.is_match(s))
            }),
            Node::Text { paths, tokens } => paths.iter().any(|path| {
                any_value(get_path(doc, path), |v| {
                    v.as_str().is_some_and(|s| {
                        let words = tokenize(s);
                        tokens.iter().any(|t| words.contains(t))
                    })
                })
            }),
            Node::And(nodes) => nodes.iter().all(|n| n.matches(doc)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(doc)),
        }
    }
}

fn split_path(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

/// Resolve a dotted path inside a document.
pub fn get_path<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Arrays match when any element matches, as document stores do.
fn any_value(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between two scalar JSON values; `None` for incomparable types.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Lowercased alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Value {
        json!({
            "id": "p1",
            "name": "Trail Running Shoe",
            "description": "Waterproof lightweight",
            "category": "footwear",
            "price": 89.5,
            "quantity": 3,
            "tags": ["outdoor", "running"],
            "dims": { "weight": 300 }
        })
    }

    #[test]
    fn test_equals_and_arrays() {
        assert!(Filter::eq("category", "footwear").compile().unwrap().matches(&doc()));
        assert!(Filter::eq("tags", "outdoor").compile().unwrap().matches(&doc()));
        assert!(Filter::eq("quantity", 3.0).compile().unwrap().matches(&doc()));
        assert!(!Filter::eq("category", "hats").compile().unwrap().matches(&doc()));
    }

    #[test]
    fn test_range_bounds() {
        let f = Filter::range(
            "price",
            Some(Bound::inclusive(89.5)),
            Some(Bound::exclusive(100)),
        );
        assert!(f.compile().unwrap().matches(&doc()));
        assert!(!Filter::gt("price", 89.5).compile().unwrap().matches(&doc()));
        assert!(Filter::gt("dims.weight", 100).compile().unwrap().matches(&doc()));
        assert!(!Filter::gt("missing", 1).compile().unwrap().matches(&doc()));
    }

    #[test]
    fn test_text_search_is_whole_token() {
        let hit = Filter::text(&["name", "description"], "waterproof");
        assert!(hit.compile().unwrap().matches(&doc()));
        let partial = Filter::text(&["name", "description"], "water");
        assert!(!partial.compile().unwrap().matches(&doc()));
    }

    #[test]
    fn test_text_search_without_words_matches_nothing() {
        let symbols = Filter::text(&["name", "description"], "+++");
        let compiled = symbols.compile().unwrap();
        assert!(!compiled.matches(&doc()));
        assert!(!compiled.matches(&json!({"description": "+++ grade"})));
    }

    #[test]
    fn test_contains_is_substring_and_escaped() {
        assert!(Filter::contains("description", "WATER").compile().unwrap().matches(&doc()));
        assert!(!Filter::contains("name", "shoe.*").compile().unwrap().matches(&doc()));
    }

    #[test]
    fn test_and_or_composition() {
        let f = Filter::and(vec![
            Filter::eq("category", "footwear"),
            Filter::or(vec![
                Filter::contains("name", "boot"),
                Filter::contains("name", "shoe"),
            ]),
        ]);
        assert!(f.compile().unwrap().matches(&doc()));
        assert!(Filter::all().compile().unwrap().matches(&doc()));
        assert!(!Filter::Or { filters: vec![] }.compile().unwrap().matches(&doc()));
    }

    #[test]
    fn test_and_flattens_nested() {
        let f = Filter::and(vec![Filter::all(), Filter::eq("a", 1)]);
        assert_eq!(f, Filter::eq("a", 1));
        assert!(Filter::and(vec![]).is_match_all());
    }

    #[test]
    fn test_to_document_shape() {
        let f = Filter::and(vec![
            Filter::eq("isActive", true),
            Filter::range("price", Some(Bound::inclusive(10)), None),
            Filter::text(&["name"], "shoe"),
        ]);
        let doc = f.to_document();
        assert_eq!(doc["$and"][0]["isActive"], true);
        assert_eq!(doc["$and"][1]["price"]["$gte"], 10);
        assert_eq!(doc["$and"][2]["$text"]["$search"], "shoe");
        assert!(f.has_text_search());
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let f = Filter::RegexMatch {
            field: "name".into(),
            pattern: "(".into(),
            case_insensitive: false,
        };
        assert!(matches!(f.compile(), Err(StorageError::InvalidQuery { .. })));
    }
}
