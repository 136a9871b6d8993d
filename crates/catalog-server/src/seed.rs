//! Initial catalog contents.

use std::path::Path;

use anyhow::Context;
use catalog_core::{Product, ProductInput, Variant};
use catalog_storage::DocumentStore;

/// Small tagged PNG used for demo products carrying inline media.
const DEMO_INLINE_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8/x8AAwMCAO+ip1sAAAAASUVORK5CYII=";

fn demo(
    name: &str,
    category: &str,
    price: f64,
    quantity: i64,
    description: &str,
) -> ProductInput {
    ProductInput {
        name: name.into(),
        description: description.into(),
        category: category.into(),
        price,
        quantity,
        images: Vec::new(),
        variants: Vec::new(),
        is_active: true,
    }
}

/// Built-in demo catalog.
pub fn demo_products() -> Vec<Product> {
    let mut inputs = vec![
        demo("Trail Running Shoe", "footwear", 129.0, 42, "Lightweight shoe with a grippy outsole"),
        demo("Leather Boot", "footwear", 189.5, 7, "Waterproof full-grain leather boot"),
        demo("Canvas Sneaker", "footwear", 59.9, 0, "Classic low-top sneaker"),
        demo("Merino Sock Pack", "accessories", 24.0, 120, "Three pairs of merino wool socks"),
        demo("Insulated Jacket", "outerwear", 249.0, 3, "Packable synthetic insulation"),
        demo("Rain Shell", "outerwear", 159.0, 18, "Breathable three-layer shell"),
        demo("Daypack 22L", "bags", 89.0, 25, "Everyday pack with laptop sleeve"),
        demo("Duffel 60L", "bags", 119.0, 2, "Roll-top duffel with shoulder straps"),
        demo("Sun Hat", "accessories", 32.0, 55, "Wide brim hat with UPF 50"),
        demo("Trekking Poles", "gear", 99.0, 11, "Carbon poles with cork grips"),
    ];
    inputs[0].variants = vec![
        Variant {
            key: "eu-42".into(),
            quantity: 20,
        },
        Variant {
            key: "eu-44".into(),
            quantity: 22,
        },
    ];
    inputs[0].images = vec![
        DEMO_INLINE_IMAGE.into(),
        "https://cdn.example.com/shoes/trail-side.jpg".into(),
    ];
    inputs[4].images = vec![DEMO_INLINE_IMAGE.into()];

    inputs.into_iter().map(Product::from_input).collect()
}

/// Read products from a JSON file holding an array of product inputs.
pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<Product>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let inputs: Vec<ProductInput> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing seed file {}", path.display()))?;
    Ok(inputs.into_iter().map(Product::from_input).collect())
}

pub async fn seed_store(
    store: &dyn DocumentStore,
    collection: &str,
    products: Vec<Product>,
) -> anyhow::Result<usize> {
    let count = products.len();
    for product in products {
        let doc = serde_json::to_value(&product)?;
        store
            .insert(collection, doc)
            .await
            .with_context(|| format!("seeding product {}", product.id))?;
    }
    tracing::info!(count, collection, "Seeded catalog");
    Ok(count)
}
