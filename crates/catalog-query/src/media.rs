//! Placeholder references for inline media stripped from listing projections.

use serde_json::Value;

/// Produces a reference URL for an image that was left out of a response.
pub trait MediaResolver: Send + Sync {
    fn reference(&self, product_id: &str, index: usize) -> String;
}

/// Resolves to the per-image endpoint of the product API.
#[derive(Debug, Clone)]
pub struct PathMediaResolver {
    base_path: String,
}

impl PathMediaResolver {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for PathMediaResolver {
    fn default() -> Self {
        Self::new("/api/products")
    }
}

impl MediaResolver for PathMediaResolver {
    fn reference(&self, product_id: &str, index: usize) -> String {
        format!("{}/{}/images/{}", self.base_path, product_id, index)
    }
}

/// Replace `null` image slots left by the projection with resolver references.
pub fn fill_media_placeholders(doc: &mut Value, resolver: &dyn MediaResolver) {
    let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    if let Some(Value::Array(images)) = doc.get_mut("images") {
        for (index, slot) in images.iter_mut().enumerate() {
            if slot.is_null() {
                *slot = Value::String(resolver.reference(&id, index));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fills_only_stripped_slots() {
        let mut doc = json!({"id": "p1", "images": [null, "https://cdn/x.png", null]});
        fill_media_placeholders(&mut doc, &PathMediaResolver::default());
        assert_eq!(
            doc["images"],
            json!([
                "/api/products/p1/images/0",
                "https://cdn/x.png",
                "/api/products/p1/images/2"
            ])
        );
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let resolver = PathMediaResolver::new("https://api.example/products/");
        assert_eq!(
            resolver.reference("p9", 1),
            "https://api.example/products/p9/images/1"
        );
    }
}
