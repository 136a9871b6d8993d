use std::sync::Arc;
use std::time::Duration;

use catalog_client::{
    CatalogFetcher, ClientCacheStore, ClientQuery, HttpCatalogFetcher, OptimisticApplier,
    PushClient, ReconciliationScheduler, ShadowStockStore,
};
use catalog_core::PushEvent;
use catalog_server::{AppConfig, build_app};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (String, tokio::sync::oneshot::Sender<()>) {
    let cfg = AppConfig::default();
    let app = build_app(&cfg).await.expect("build app");
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });
    (format!("{addr}"), tx)
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame within timeout")
            .expect("open stream")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn first_product(http: &reqwest::Client, base: &str, name: &str) -> Value {
    let listing: Value = http
        .get(format!("http://{base}/api/products?limit=100"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    listing["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == name)
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn stock_updates_reach_sessions_and_alerts_reach_operators() {
    let (addr, shutdown) = start_server().await;
    let http = reqwest::Client::new();

    let (mut operator, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut shopper, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let welcome = recv(&mut operator).await;
    assert_eq!(welcome["event"], "welcome");
    assert!(welcome["data"]["sessionId"].is_string());
    assert_eq!(recv(&mut shopper).await["event"], "welcome");

    // Pong comes after the join has been processed.
    send(&mut operator, json!({"action": "joinRoom", "room": "operators"})).await;
    send(&mut operator, json!({"action": "ping"})).await;
    assert_eq!(recv(&mut operator).await["event"], "pong");

    let product = first_product(&http, &addr, "Rain Shell").await;
    let id = product["id"].as_str().unwrap();
    let resp = http
        .patch(format!("http://{addr}/api/products/{id}/stock"))
        .json(&json!({"quantity": 3, "operationId": "op-42"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["delivery"]["delivered"], 3);

    let update = recv(&mut operator).await;
    assert_eq!(update["event"], "stockUpdate");
    assert_eq!(update["data"]["type"], "single_product");
    assert_eq!(update["data"]["entityId"], id);
    assert_eq!(update["data"]["newQuantity"], 3);
    assert_eq!(update["data"]["originatingOperationId"], "op-42");

    let alert = recv(&mut operator).await;
    assert_eq!(alert["event"], "lowStockAlert");
    assert_eq!(alert["data"]["entityId"], id);
    assert_eq!(alert["data"]["threshold"], 5);

    let update = recv(&mut shopper).await;
    assert_eq!(update["event"], "stockUpdate");
    // The shopper is not in the privileged room: the next frame is its own pong.
    send(&mut shopper, json!({"action": "ping"})).await;
    assert_eq!(recv(&mut shopper).await["event"], "pong");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn invalid_commands_are_answered_with_error_notifications() {
    let (addr, shutdown) = start_server().await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(recv(&mut socket).await["event"], "welcome");

    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    let reply = recv(&mut socket).await;
    assert_eq!(reply["event"], "notification");
    assert_eq!(reply["data"]["level"], "error");

    send(&mut socket, json!({"action": "joinRoom", "room": "bad room!"})).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["event"], "notification");
    assert_eq!(reply["data"]["level"], "error");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn notifications_are_broadcast_to_every_session() {
    let (addr, shutdown) = start_server().await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(recv(&mut socket).await["event"], "welcome");

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/notifications"))
        .json(&json!({"level": "warning", "title": "Maintenance", "message": "Back soon"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let frame = recv(&mut socket).await;
    assert_eq!(frame["event"], "notification");
    assert_eq!(frame["data"]["title"], "Maintenance");
    assert_eq!(frame["data"]["level"], "warning");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn client_cache_follows_pushed_stock_and_reconciles() {
    let (addr, shutdown) = start_server().await;
    let http = reqwest::Client::new();
    let base = format!("http://{addr}");

    let fetcher = Arc::new(HttpCatalogFetcher::new(&base).unwrap());
    let cache = Arc::new(ClientCacheStore::default());
    let shadow = Arc::new(ShadowStockStore::new());

    let list_query = ClientQuery::list("category=bags");
    cache.set(&list_query, fetcher.fetch_list("category=bags").await.unwrap());
    cache.observe(&list_query);

    // A plain reader leaves the pre-write listing in the microcache.
    let warm = http
        .get(format!("{base}/api/products?category=bags"))
        .send()
        .await
        .unwrap();
    assert_eq!(warm.headers()["x-microcache"], "HIT");

    let scheduler = ReconciliationScheduler::new(cache.clone(), shadow.clone(), fetcher.clone())
        .with_delay(Duration::from_millis(50));
    let applier = Arc::new(OptimisticApplier::new(cache.clone(), shadow.clone()).with_scheduler(scheduler));

    let mut push = PushClient::connect(&format!("ws://{addr}/ws")).await.unwrap();
    match push.next_event().await.unwrap() {
        Some(PushEvent::Welcome { .. }) => {}
        other => panic!("expected welcome, got {other:?}"),
    }
    assert!(push.session_id().is_some());
    let runner = tokio::spawn(push.run(applier.clone()));

    let product = first_product(&http, &addr, "Daypack 22L").await;
    let id = product["id"].as_str().unwrap().to_string();
    let resp = http
        .patch(format!("{base}/api/products/{id}/stock"))
        .json(&json!({"quantity": 9}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Wait for the optimistic patch and the reconciled detail entry.
    let detail = ClientQuery::detail(id.clone());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let listed = cache
            .data(&list_query)
            .and_then(|data| {
                data["items"]
                    .as_array()
                    .and_then(|items| items.iter().find(|p| p["id"] == id.as_str()).cloned())
            })
            .map(|p| p["quantity"].clone());
        let reconciled = cache.data(&detail).map(|d| d["quantity"].clone());
        if listed == Some(json!(9)) && reconciled == Some(json!(9)) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "cache did not converge: list={listed:?} detail={reconciled:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(shadow.get(&id), Some(9));

    runner.abort();
    let _ = shutdown.send(());
}
