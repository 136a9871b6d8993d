use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::now_utc;
use crate::id::generate_id;

/// Prefix that marks an image entry as inline binary payload rather than a reference.
pub const INLINE_MEDIA_PREFIX: &str = "data:";

/// Stock held for one variant (size, colour, ...) of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub key: String,
    pub quantity: i64,
}

/// A catalog product as exposed over the API and stored in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price: f64,
    pub quantity: i64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_true() -> bool {
    true
}

/// Client-supplied product fields for create and full update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Product {
    /// Build a new product from input, assigning an id and timestamps.
    pub fn from_input(input: ProductInput) -> Self {
        let now = now_utc();
        Self {
            id: generate_id(),
            name: input.name,
            description: input.description,
            category: input.category,
            price: input.price,
            quantity: input.quantity,
            images: input.images,
            variants: input.variants,
            is_active: input.is_active,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace mutable fields from input, keeping identity and creation time.
    pub fn apply_input(&mut self, input: ProductInput) {
        self.name = input.name;
        self.description = input.description;
        self.category = input.category;
        self.price = input.price;
        self.quantity = input.quantity;
        self.images = input.images;
        self.variants = input.variants;
        self.is_active = input.is_active;
        self.updated_at = now_utc();
    }

    /// Set the stock level, either of the product or of one of its variants.
    ///
    /// Returns `false` when a variant key is given but no such variant exists.
    pub fn set_quantity(&mut self, variant_key: Option<&str>, quantity: i64) -> bool {
        let applied = match variant_key {
            None => {
                self.quantity = quantity;
                true
            }
            Some(key) => match self.variants.iter_mut().find(|v| v.key == key) {
                Some(variant) => {
                    variant.quantity = quantity;
                    true
                }
                None => false,
            },
        };
        if applied {
            self.updated_at = now_utc();
        }
        applied
    }

    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }

    pub fn has_inline_media(&self) -> bool {
        self.images.iter().any(|img| is_inline_media(img))
    }
}

pub fn is_inline_media(image: &str) -> bool {
    image.starts_with(INLINE_MEDIA_PREFIX)
}
