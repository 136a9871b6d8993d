use std::time::Duration;

use catalog_core::{PushEvent, StockUpdate};
use catalog_server::{AppConfig, AppState, build_app, build_router};
use catalog_storage::StoreOperation;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn serve(app: axum::Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        shutdown: tx,
        handle,
    }
}

fn uncached_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.microcache.enabled = false;
    cfg
}

async fn start_server(cfg: &AppConfig) -> TestServer {
    serve(build_app(cfg).await.expect("build app")).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn get_json(client: &reqwest::Client, url: String) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn product_id(client: &reqwest::Client, base: &str, name: &str) -> String {
    let (_, body) = get_json(client, format!("{base}/api/products?limit=100&sortBy=name")).await;
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|item| item["name"] == name)
        .and_then(|item| item["id"].as_str())
        .unwrap_or_else(|| panic!("{name} not listed"))
        .to_string()
}

#[tokio::test]
async fn service_endpoints_work() {
    catalog_server::metrics::init_metrics();
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;

    let (status, body) = get_json(&client, format!("{base}/")).await;
    assert_eq!(status, 200);
    assert_eq!(body["service"], "catalog-server");

    let (status, body) = get_json(&client, format!("{base}/healthz")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&client, format!("{base}/readyz")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ready");

    // Generate some traffic before scraping.
    get_json(&client, format!("{base}/api/products")).await;
    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("http_requests_total"));

    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.headers().contains_key("x-request-id"));

    server.stop().await;
}

#[tokio::test]
async fn listing_envelope_and_query_cache() {
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;

    let (status, body) = get_json(
        &client,
        format!("{base}/api/products?category=footwear&sortBy=price&sortOrder=asc"),
    )
    .await;
    assert_eq!(status, 200);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    let prices: Vec<f64> = items.iter().map(|i| i["price"].as_f64().unwrap()).collect();
    assert!(prices.windows(2).all(|w| w[0] <= w[1]));

    let pagination = &body["pagination"];
    assert_eq!(pagination["mode"], "page");
    assert_eq!(pagination["page"], 1);
    assert_eq!(pagination["total"], 3);
    assert_eq!(pagination["totalPages"], 1);
    assert_eq!(pagination["hasNext"], false);
    assert_eq!(pagination["hasPrev"], false);
    assert_eq!(body["performance"]["cached"], false);
    assert_eq!(body["performance"]["strategy"], "aggregate");

    // Same parameters in another order hit the same cache entry.
    let (_, again) = get_json(
        &client,
        format!("{base}/api/products?sortOrder=asc&sortBy=price&category=footwear&unknown=1"),
    )
    .await;
    assert_eq!(again["performance"]["cached"], true);
    assert_eq!(again["items"], body["items"]);

    let (_, stats) = get_json(&client, format!("{base}/api/cache/stats")).await;
    assert_eq!(stats["queryCache"]["hits"], 1);
    assert_eq!(stats["queryCache"]["size"], 1);

    server.stop().await;
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;

    for query in [
        "limit=0",
        "limit=1000",
        "sortBy=color",
        "sortOrder=sideways",
        "minPrice=50&maxPrice=10",
        "cursor=abc&page=2&sortBy=id",
        "inStock=maybe",
    ] {
        let (status, body) = get_json(&client, format!("{base}/api/products?{query}")).await;
        assert_eq!(status, 400, "{query}");
        assert_eq!(body["error"]["code"], "validation_failure", "{query}");
    }

    server.stop().await;
}

#[tokio::test]
async fn cursor_pagination_walks_all_products() {
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;

    let mut seen = Vec::new();
    let mut url = format!("{base}/api/products?sortBy=id&sortOrder=asc&limit=4");
    loop {
        let (status, body) = get_json(&client, url.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(body["pagination"]["mode"], "cursor");
        for item in body["items"].as_array().unwrap() {
            seen.push(item["id"].as_str().unwrap().to_string());
        }
        match body["pagination"]["nextCursor"].as_str() {
            Some(cursor) => {
                assert_eq!(body["pagination"]["hasMore"], true);
                url = format!("{base}/api/products?sortBy=id&sortOrder=asc&limit=4&cursor={cursor}");
            }
            None => break,
        }
    }
    assert_eq!(seen.len(), 10);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);

    server.stop().await;
}

#[tokio::test]
async fn search_escalates_to_substring_match() {
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;

    let (_, exact) = get_json(&client, format!("{base}/api/products?search=boot")).await;
    assert_eq!(exact["performance"]["strategy"], "aggregate");
    assert_eq!(exact["items"][0]["name"], "Leather Boot");

    let (_, partial) = get_json(&client, format!("{base}/api/products?search=runn")).await;
    assert_eq!(partial["performance"]["strategy"], "substringSearch");
    assert_eq!(partial["items"][0]["name"], "Trail Running Shoe");

    // Too short to escalate: the empty primary result stands.
    let (_, short) = get_json(&client, format!("{base}/api/products?search=ru")).await;
    assert_eq!(short["performance"]["strategy"], "aggregate");
    assert!(short["items"].as_array().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn inline_media_is_replaced_by_references() {
    let server = start_server(&uncached_config()).await;
    let client = client();
    let base = &server.base;
    let id = product_id(&client, base, "Trail Running Shoe").await;

    let (_, listing) = get_json(&client, format!("{base}/api/products?search=trail")).await;
    let images = &listing["items"][0]["images"];
    assert_eq!(images[0], format!("/api/products/{id}/images/0"));
    assert_eq!(images[1], "https://cdn.example.com/shoes/trail-side.jpg");

    let (_, full) = get_json(
        &client,
        format!("{base}/api/products?search=trail&includeImages=true"),
    )
    .await;
    assert!(
        full["items"][0]["images"][0]
            .as_str()
            .unwrap()
            .starts_with("data:image/png")
    );

    let (_, detail) = get_json(&client, format!("{base}/api/products/{id}")).await;
    assert_eq!(detail["images"][0], format!("/api/products/{id}/images/0"));

    let resp = client
        .get(format!("{base}/api/products/{id}/images/0"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert!(!resp.bytes().await.unwrap().is_empty());

    let resp = client
        .get(format!("{base}/api/products/{id}/images/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 307);
    assert_eq!(
        resp.headers()["location"],
        "https://cdn.example.com/shoes/trail-side.jpg"
    );

    let (status, _) = get_json(&client, format!("{base}/api/products/{id}/images/9")).await;
    assert_eq!(status, 404);

    server.stop().await;
}

#[tokio::test]
async fn write_path_invalidates_and_broadcasts() {
    let mut cfg = uncached_config();
    cfg.storage.max_document_bytes = 4 * 1024;
    let server = start_server(&cfg).await;
    let client = client();
    let base = &server.base;

    // Warm the query cache.
    get_json(&client, format!("{base}/api/products?category=home")).await;

    let resp = client
        .post(format!("{base}/api/products"))
        .json(&json!({"name": "Desk Lamp", "price": 39.0, "quantity": 8, "category": "home"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let (_, listing) = get_json(&client, format!("{base}/api/products?category=home")).await;
    assert_eq!(listing["performance"]["cached"], false);
    assert_eq!(listing["items"][0]["id"], id.as_str());

    // Stock patch.
    let resp = client
        .patch(format!("{base}/api/products/{id}/stock"))
        .json(&json!({"quantity": 2, "operationId": "op-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["product"]["quantity"], 2);
    assert_eq!(body["delivery"]["delivered"], 0);

    let (_, detail) = get_json(&client, format!("{base}/api/products/{id}")).await;
    assert_eq!(detail["quantity"], 2);

    // Unknown variant and negative quantities are validation failures.
    let resp = client
        .patch(format!("{base}/api/products/{id}/stock"))
        .json(&json!({"quantity": 1, "variantKey": "xl"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let resp = client
        .patch(format!("{base}/api/products/{id}/stock"))
        .json(&json!({"quantity": -1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Bulk update across two products, checked before anything is written.
    let other = product_id(&client, base, "Sun Hat").await;
    let resp = client
        .post(format!("{base}/api/products/stock/bulk"))
        .json(&json!({"updates": [
            {"entityId": id, "newQuantity": 5},
            {"entityId": "missing", "newQuantity": 1}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let (_, detail) = get_json(&client, format!("{base}/api/products/{id}")).await;
    assert_eq!(detail["quantity"], 2);

    let resp = client
        .post(format!("{base}/api/products/stock/bulk"))
        .json(&json!({"updates": [
            {"entityId": id, "newQuantity": 5},
            {"entityId": other, "newQuantity": 0}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated"], 2);

    let (_, out_of_stock) =
        get_json(&client, format!("{base}/api/products?inStock=false&limit=50")).await;
    let names: Vec<&str> = out_of_stock["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Sun Hat"));

    // Oversized documents carry a remediation hint.
    let big_image = format!("data:image/png;base64,{}", "A".repeat(8 * 1024));
    let resp = client
        .post(format!("{base}/api/products"))
        .json(&json!({"name": "Poster", "price": 5.0, "images": [big_image]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "oversized_payload");
    assert!(body["error"]["hint"].as_str().unwrap().contains("reference"));

    // Archive hides the product from listings; delete removes it.
    let resp = client
        .post(format!("{base}/api/products/{id}/archive"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let (_, listing) = get_json(&client, format!("{base}/api/products?category=home")).await;
    assert!(listing["items"].as_array().unwrap().is_empty());

    let resp = client
        .delete(format!("{base}/api/products/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    let (status, body) = get_json(&client, format!("{base}/api/products/{id}")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    server.stop().await;
}

#[tokio::test]
async fn degraded_store_falls_back_and_serves_stale() {
    let mut cfg = uncached_config();
    cfg.query.budgets.primary = Duration::from_millis(100);
    cfg.query.budgets.simplified = Duration::from_millis(500);
    cfg.cache.ttl_ms = 50;
    let state = AppState::build(&cfg).await.expect("state");
    let faults = state.faults.clone();
    let server = serve(build_router(state, &cfg)).await;
    let client = client();
    let base = &server.base;

    // Warm the cache, then let the entry go stale.
    let (_, warm) = get_json(&client, format!("{base}/api/products?category=bags")).await;
    assert_eq!(warm["performance"]["strategy"], "aggregate");
    tokio::time::sleep(Duration::from_millis(80)).await;

    // Primary times out: the simplified scan answers without a total.
    faults.set_latency(StoreOperation::Aggregate, Duration::from_millis(400));
    let started = std::time::Instant::now();
    let (status, body) = get_json(&client, format!("{base}/api/products?category=outerwear")).await;
    assert_eq!(status, 200);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(body["performance"]["strategy"], "simplifiedScan");
    assert!(body["pagination"]["total"].is_null());
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert!(body["items"][0].get("description").is_none());
    faults.clear_latency(StoreOperation::Aggregate);

    // Every stage fails: no resident entry means a 502 listing the stages.
    faults.fail_next(StoreOperation::Aggregate, 1);
    faults.fail_next(StoreOperation::Find, 1);
    let (status, body) = get_json(&client, format!("{base}/api/products?category=gear")).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "fallback_chain_exhausted");
    assert_eq!(body["error"]["attemptedStages"].as_array().unwrap().len(), 2);

    // Same failure with a stale resident entry serves the stale payload.
    faults.fail_next(StoreOperation::Aggregate, 1);
    faults.fail_next(StoreOperation::Find, 1);
    let (status, body) = get_json(&client, format!("{base}/api/products?category=bags")).await;
    assert_eq!(status, 200);
    assert_eq!(body["performance"]["stale"], true);
    assert_eq!(body["items"], warm["items"]);

    server.stop().await;
}

#[tokio::test]
async fn partial_bulk_write_is_invalidated_and_announced() {
    let cfg = uncached_config();
    let state = AppState::build(&cfg).await.expect("state");
    let faults = state.faults.clone();
    let mut session = state.notifier.register();
    let server = serve(build_router(state, &cfg)).await;
    let client = client();
    let base = &server.base;

    let names = ["Daypack 22L", "Duffel 60L", "Rain Shell"];
    let mut ids = Vec::new();
    for name in names {
        ids.push(product_id(&client, base, name).await);
    }
    let (_, warm) = get_json(&client, format!("{base}/api/products?category=bags")).await;
    assert_eq!(warm["performance"]["cached"], false);
    let (_, again) = get_json(&client, format!("{base}/api/products?category=bags")).await;
    assert_eq!(again["performance"]["cached"], true);

    // The first write lands, the second fails, the third is never attempted.
    faults.fail_after(StoreOperation::Write, 1, 1);
    let resp = client
        .post(format!("{base}/api/products/stock/bulk"))
        .json(&json!({"updates": [
            {"entityId": ids[0], "newQuantity": 11},
            {"entityId": ids[1], "newQuantity": 12},
            {"entityId": ids[2], "newQuantity": 13}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "store_unavailable");

    let frame = session.events.try_recv().expect("bulk frame for the saved product");
    let updates = match frame {
        PushEvent::StockUpdate(StockUpdate::BulkUpdate { updates, .. }) => updates,
        other => panic!("expected bulk stock update, got {other:?}"),
    };
    assert_eq!(updates.len(), 1);
    let saved = &updates[0];

    let mut written = 0;
    for (id, quantity) in ids.iter().zip([11, 12, 13]) {
        let (_, detail) = get_json(&client, format!("{base}/api/products/{id}")).await;
        if detail["quantity"] == quantity {
            written += 1;
            assert_eq!(&saved.entity_id, id);
            assert_eq!(saved.new_quantity, quantity);
        }
    }
    assert_eq!(written, 1);

    // The query cache no longer answers from the pre-write listing.
    let (_, after) = get_json(&client, format!("{base}/api/products?category=bags")).await;
    assert_eq!(after["performance"]["cached"], false);

    server.stop().await;
}

#[tokio::test]
async fn microcache_replays_get_responses() {
    let server = start_server(&AppConfig::default()).await;
    let client = client();
    let base = &server.base;

    let first = client
        .get(format!("{base}/api/products?limit=3"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.headers()["x-microcache"], "MISS");
    let first_body: Value = first.json().await.unwrap();

    let second = client
        .get(format!("{base}/api/products?limit=3"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.headers()["x-microcache"], "HIT");
    let second_body: Value = second.json().await.unwrap();
    assert_eq!(first_body, second_body);

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(!health.headers().contains_key("x-microcache"));

    let (_, stats) = get_json(&client, format!("{base}/api/cache/stats")).await;
    assert_eq!(stats["microcache"]["hits"], 1);

    server.stop().await;
}
