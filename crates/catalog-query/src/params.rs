//! Listing request parameters.
//!
//! Parameters are parsed from the raw query string. Unknown parameters are
//! ignored, empty values count as absent, and when a parameter repeats the last
//! occurrence wins.

use catalog_core::CatalogError;
use catalog_storage::SortDirection;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_MAX_LIMIT: usize = 100;

/// Sortable product fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Name,
    Price,
    Quantity,
    #[default]
    CreatedAt,
    UpdatedAt,
    Id,
}

impl SortKey {
    pub const ALLOWED: &'static str = "name, price, quantity, createdAt, updatedAt, id";

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "name" => Some(Self::Name),
            "price" => Some(Self::Price),
            "quantity" => Some(Self::Quantity),
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            "id" => Some(Self::Id),
            _ => None,
        }
    }

    /// Document field the key sorts on.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::Quantity => "quantity",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Id => "id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListParamsError {
    #[error("Invalid value '{value}' for {param}: expected {expected}")]
    InvalidValue {
        param: &'static str,
        value: String,
        expected: String,
    },

    #[error("{param} must be between {min} and {max}, got {value}")]
    OutOfRange {
        param: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{message}")]
    Conflict {
        param: &'static str,
        message: String,
    },
}

impl ListParamsError {
    fn invalid(param: &'static str, value: &str, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            param,
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    fn conflict(param: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            param,
            message: message.into(),
        }
    }

    pub fn param(&self) -> &'static str {
        match self {
            Self::InvalidValue { param, .. }
            | Self::OutOfRange { param, .. }
            | Self::Conflict { param, .. } => param,
        }
    }
}

impl From<ListParamsError> for CatalogError {
    fn from(err: ListParamsError) -> Self {
        CatalogError::validation(err.param(), err.to_string())
    }
}

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

/// Validated parameters of a product listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: usize,
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort_by: SortKey,
    pub sort_order: SortDirection,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub in_stock: Option<bool>,
    pub cursor: Option<String>,
    pub include_images: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: None,
            limit: DEFAULT_LIMIT,
            category: None,
            search: None,
            sort_by: SortKey::default(),
            sort_order: SortDirection::Desc,
            min_price: None,
            max_price: None,
            in_stock: None,
            cursor: None,
            include_images: false,
        }
    }
}

impl ListParams {
    /// Parse and validate a raw query string (without the leading `?`).
    pub fn from_query(query: &str, limits: &ParamLimits) -> Result<Self, ListParamsError> {
        let mut params = ListParams {
            limit: limits.default_limit,
            ..ListParams::default()
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "page" => {
                    let page = parse_int("page", value)?;
                    if page < 1 || page > u32::MAX as i64 {
                        return Err(ListParamsError::OutOfRange {
                            param: "page",
                            value: page,
                            min: 1,
                            max: u32::MAX as i64,
                        });
                    }
                    params.page = Some(page as u32);
                }
                "limit" => {
                    let limit = parse_int("limit", value)?;
                    if limit < 1 || limit > limits.max_limit as i64 {
                        return Err(ListParamsError::OutOfRange {
                            param: "limit",
                            value: limit,
                            min: 1,
                            max: limits.max_limit as i64,
                        });
                    }
                    params.limit = limit as usize;
                }
                "category" => params.category = Some(value.to_string()),
                "search" => params.search = Some(value.to_string()),
                "sortBy" => {
                    params.sort_by = SortKey::parse(value)
                        .ok_or_else(|| ListParamsError::invalid("sortBy", value, SortKey::ALLOWED))?;
                }
                "sortOrder" => {
                    params.sort_order = match value.to_ascii_lowercase().as_str() {
                        "asc" => SortDirection::Asc,
                        "desc" => SortDirection::Desc,
                        _ => return Err(ListParamsError::invalid("sortOrder", value, "asc or desc")),
                    };
                }
                "minPrice" => params.min_price = Some(parse_price("minPrice", value)?),
                "maxPrice" => params.max_price = Some(parse_price("maxPrice", value)?),
                "inStock" => params.in_stock = Some(parse_bool("inStock", value)?),
                "cursor" => params.cursor = Some(value.to_string()),
                "includeImages" => params.include_images = parse_bool("includeImages", value)?,
                _ => {}
            }
        }

        params.validate()?;
        Ok(params)
    }

    /// Cross-parameter checks.
    pub fn validate(&self) -> Result<(), ListParamsError> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price)
            && min > max
        {
            return Err(ListParamsError::conflict(
                "minPrice",
                format!("minPrice ({min}) must not exceed maxPrice ({max})"),
            ));
        }
        if self.cursor.is_some() {
            if self.page.is_some() {
                return Err(ListParamsError::conflict(
                    "cursor",
                    "cursor and page are mutually exclusive",
                ));
            }
            if self.sort_by != SortKey::Id {
                return Err(ListParamsError::conflict(
                    "cursor",
                    "cursor pagination requires sortBy=id",
                ));
            }
        }
        Ok(())
    }

    /// Cursor pagination applies to id-sorted listings that do not ask for a page.
    pub fn uses_cursor(&self) -> bool {
        self.cursor.is_some() || (self.sort_by == SortKey::Id && self.page.is_none())
    }
}

fn parse_int(param: &'static str, value: &str) -> Result<i64, ListParamsError> {
    value
        .parse::<i64>()
        .map_err(|_| ListParamsError::invalid(param, value, "an integer"))
}

fn parse_price(param: &'static str, value: &str) -> Result<f64, ListParamsError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ListParamsError::invalid(param, value, "a non-negative number")),
    }
}

fn parse_bool(param: &'static str, value: &str) -> Result<bool, ListParamsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ListParamsError::invalid(param, value, "true or false")),
    }
}
