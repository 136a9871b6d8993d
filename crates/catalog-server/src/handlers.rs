use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use base64::Engine as _;
use catalog_core::{
    CatalogError, DeltaMeta, Notification, Product, ProductInput, StockChange, is_inline_media,
};
use catalog_notify::DeliveryReport;
use catalog_query::{ListParams, ListResponse, MediaResolver, QuerySpec};
use catalog_storage::OVERSIZED_HINT;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// =============================================================================
// Service endpoints
// =============================================================================

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "catalog-server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    }))
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs()
    }))
}

/// Ready when the store answers a point read within its budget.
pub async fn readyz(State(state): State<AppState>) -> Response {
    match state.store.get(state.collection, "__readyz__").await {
        Ok(_) => Json(json!({
            "status": "ready",
            "backend": state.store.backend_name()
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn metrics_handler() -> Response {
    match metrics::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "queryCache": state.engine.cache().stats(),
        "microcache": state.microcache.stats(),
        "notifier": state.notifier.stats(),
    }))
}

// =============================================================================
// Reads
// =============================================================================

pub async fn list_products(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<ListResponse>> {
    let params = ListParams::from_query(raw.as_deref().unwrap_or(""), &state.param_limits)?;
    let spec = QuerySpec::from_params(&params)?;
    let response = state.engine.list(&spec).await?;
    tracing::debug!(
        strategy = %response.performance.strategy,
        cached = response.performance.cached,
        stale = response.performance.stale,
        items = response.items.len(),
        "Listing served"
    );
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailParams {
    #[serde(default)]
    pub include_images: bool,
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DetailParams>,
) -> ApiResult<Json<Product>> {
    let mut product = load_product(&state, &id).await?;
    if !params.include_images {
        let resolver: &dyn MediaResolver = state.media.as_ref();
        for (index, image) in product.images.iter_mut().enumerate() {
            if is_inline_media(image) {
                *image = resolver.reference(&product.id, index);
            }
        }
    }
    Ok(Json(product))
}

/// Serve one product image: inline payloads are decoded, references redirect.
pub async fn get_product_image(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let product = load_product(&state, &id).await?;
    let image = product
        .images
        .get(index)
        .ok_or_else(|| CatalogError::not_found("image", format!("{id}/{index}")))?;

    if !is_inline_media(image) {
        return Ok(Redirect::temporary(image).into_response());
    }
    let (content_type, bytes) = decode_data_uri(image)?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        bytes,
    )
        .into_response())
}

fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), CatalogError> {
    let rest = uri.strip_prefix("data:").unwrap_or(uri);
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| CatalogError::internal("malformed inline image"))?;
    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    let bytes = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| CatalogError::internal(format!("inline image is not base64: {e}")))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((mime.to_string(), bytes))
}

// =============================================================================
// Writes
// =============================================================================

pub async fn create_product(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let input: ProductInput = parse_body(&state, &body)?;
    validate_input(&input)?;
    let product = Product::from_input(input);
    state
        .store
        .insert(state.collection, serde_json::to_value(&product).map_err(CatalogError::from)?)
        .await?;
    invalidate(&state, "create");
    tracing::info!(id = %product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Product>> {
    let input: ProductInput = parse_body(&state, &body)?;
    validate_input(&input)?;
    let mut product = load_product(&state, &id).await?;
    let previous_quantity = product.quantity;
    product.apply_input(input);
    save_product(&state, &product).await?;
    invalidate(&state, "update");

    if product.quantity != previous_quantity {
        state
            .notifier
            .broadcast_single(&product.id, product.quantity, DeltaMeta::default());
        metrics::record_stock_broadcast("single");
    }
    tracing::info!(id = %product.id, "Product updated");
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.store.delete(state.collection, &id).await? {
        return Err(CatalogError::not_found("product", id).into());
    }
    invalidate(&state, "delete");
    tracing::info!(id = %id, "Product deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Product>> {
    let mut product = load_product(&state, &id).await?;
    product.is_archived = true;
    product.updated_at = catalog_core::now_utc();
    save_product(&state, &product).await?;
    invalidate(&state, "archive");
    tracing::info!(id = %id, "Product archived");
    Ok(Json(product))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockPatch {
    pub quantity: i64,
    #[serde(default)]
    pub variant_key: Option<String>,
    #[serde(default)]
    pub operation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product: Product,
    pub delivery: DeliveryReport,
}

pub async fn patch_stock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<StockResponse>> {
    let patch: StockPatch = parse_body(&state, &body)?;
    validate_quantity("quantity", patch.quantity)?;

    let mut product = load_product(&state, &id).await?;
    apply_stock(&mut product, patch.variant_key.as_deref(), patch.quantity)?;
    save_product(&state, &product).await?;
    invalidate(&state, "stock");

    let meta = DeltaMeta {
        variant_key: patch.variant_key,
        operation_id: patch.operation_id,
    };
    let delivery = state
        .notifier
        .broadcast_single(&product.id, patch.quantity, meta);
    metrics::record_stock_broadcast("single");
    tracing::info!(
        id = %product.id,
        quantity = patch.quantity,
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "Stock updated"
    );
    Ok(Json(StockResponse { product, delivery }))
}

#[derive(Debug, Deserialize)]
pub struct BulkStockRequest {
    pub updates: Vec<StockChange>,
}

#[derive(Debug, Serialize)]
pub struct BulkStockResponse {
    pub updated: usize,
    pub delivery: DeliveryReport,
}

/// Apply several stock changes. Every change is checked before any is written.
pub async fn bulk_stock(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<BulkStockResponse>> {
    let request: BulkStockRequest = parse_body(&state, &body)?;
    if request.updates.is_empty() {
        return Err(CatalogError::validation("updates", "must not be empty").into());
    }

    let mut products: HashMap<String, Product> = HashMap::new();
    for change in &request.updates {
        validate_quantity("newQuantity", change.new_quantity)?;
        if !products.contains_key(&change.entity_id) {
            let product = load_product(&state, &change.entity_id).await?;
            products.insert(change.entity_id.clone(), product);
        }
        if let Some(product) = products.get_mut(&change.entity_id) {
            apply_stock(
                product,
                change.meta.variant_key.as_deref(),
                change.new_quantity,
            )?;
        }
    }

    let mut saved: HashSet<&str> = HashSet::with_capacity(products.len());
    let mut failure = None;
    for product in products.values() {
        match save_product(&state, product).await {
            Ok(()) => {
                saved.insert(product.id.as_str());
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // Whatever reached the store is invalidated and announced, even on failure.
    if !saved.is_empty() {
        invalidate(&state, "stock");
    }
    let updated = saved.len();
    let changes: Vec<StockChange> = request
        .updates
        .into_iter()
        .filter(|change| saved.contains(change.entity_id.as_str()))
        .collect();
    let delivery = state.notifier.broadcast_bulk(changes);
    if updated > 0 {
        metrics::record_stock_broadcast("bulk");
    }

    if let Some(err) = failure {
        tracing::warn!(
            saved = updated,
            requested = products.len(),
            error = %err.0,
            "Bulk stock update partially applied"
        );
        return Err(err);
    }
    tracing::info!(
        products = updated,
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "Bulk stock update applied"
    );
    Ok(Json(BulkStockResponse { updated, delivery }))
}

pub async fn post_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<DeliveryReport>> {
    let notification: Notification = parse_body(&state, &body)?;
    if notification.title.trim().is_empty() {
        return Err(CatalogError::validation("title", "must not be empty").into());
    }
    let delivery = state.notifier.notify(notification);
    Ok(Json(delivery))
}

// =============================================================================
// Helpers
// =============================================================================

fn invalidate(state: &AppState, reason: &'static str) {
    state.engine.invalidate();
    metrics::record_cache_invalidation(reason);
}

async fn load_product(state: &AppState, id: &str) -> ApiResult<Product> {
    let doc = state
        .store
        .get(state.collection, id)
        .await?
        .ok_or_else(|| CatalogError::not_found("product", id))?;
    Ok(serde_json::from_value(doc).map_err(CatalogError::from)?)
}

async fn save_product(state: &AppState, product: &Product) -> ApiResult<()> {
    let doc = serde_json::to_value(product).map_err(CatalogError::from)?;
    state.store.replace(state.collection, &product.id, doc).await?;
    Ok(())
}

/// Reject bodies above the document limit before parsing them.
fn parse_body<T: serde::de::DeserializeOwned>(state: &AppState, body: &Bytes) -> ApiResult<T> {
    if body.len() > state.max_document_bytes {
        return Err(
            CatalogError::oversized(body.len(), state.max_document_bytes, OVERSIZED_HINT).into(),
        );
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(CatalogError::validation("body", e.to_string())))
}

fn validate_input(input: &ProductInput) -> Result<(), CatalogError> {
    if input.name.trim().is_empty() {
        return Err(CatalogError::validation("name", "must not be empty"));
    }
    if !input.price.is_finite() || input.price < 0.0 {
        return Err(CatalogError::validation(
            "price",
            "must be a non-negative number",
        ));
    }
    validate_quantity("quantity", input.quantity)?;
    for variant in &input.variants {
        validate_quantity("variants.quantity", variant.quantity)?;
    }
    Ok(())
}

fn validate_quantity(field: &str, quantity: i64) -> Result<(), CatalogError> {
    if quantity < 0 {
        return Err(CatalogError::validation(field, "must be >= 0"));
    }
    Ok(())
}

fn apply_stock(
    product: &mut Product,
    variant_key: Option<&str>,
    quantity: i64,
) -> Result<(), CatalogError> {
    if product.set_quantity(variant_key, quantity) {
        return Ok(());
    }
    Err(CatalogError::validation(
        "variantKey",
        format!(
            "product {} has no variant {}",
            product.id,
            variant_key.unwrap_or_default()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_data_uri() {
        let (mime, bytes) = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_plain_data_uri() {
        let (mime, bytes) = decode_data_uri("data:,plain").unwrap();
        assert_eq!(mime, "application/octet-stream");
        assert_eq!(bytes, b"plain");
        assert!(decode_data_uri("data:image/png;base64").is_err());
    }

    #[test]
    fn test_input_validation() {
        let mut input: ProductInput =
            serde_json::from_value(json!({"name": "Cup", "price": 3.0})).unwrap();
        assert!(validate_input(&input).is_ok());
        input.price = -1.0;
        assert!(matches!(
            validate_input(&input),
            Err(CatalogError::Validation { ref field, .. }) if field == "price"
        ));
        input.price = 1.0;
        input.quantity = -2;
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let mut product = Product::from_input(
            serde_json::from_value(json!({"name": "Cup", "price": 3.0, "quantity": 1})).unwrap(),
        );
        assert!(apply_stock(&mut product, None, 4).is_ok());
        assert_eq!(product.quantity, 4);
        assert!(apply_stock(&mut product, Some("xl"), 1).is_err());
    }
}
