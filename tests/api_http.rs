// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::{finding, harness, Harness};
use signal_refinery::analyze::llm::MockLlm;
use signal_refinery::create_router;

const BODY_LIMIT: usize = 1024 * 1024;

fn router_for(h: &Harness) -> Router {
    create_router(h.coordinator.clone())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

async fn post_json(app: &Router, uri: &str, body: Json) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build POST");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn health_and_root_are_alive() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);
    for uri in ["/", "/health"] {
        let req = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn ingest_returns_id_and_persists() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);

    let (status, v) = post_json(
        &app,
        "/ingest",
        json!({"chat_id": "c1", "title": "News", "text": "Central bank hikes rates 25bp."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "accepted");
    assert!(v["id"].is_string());

    // Some upstream automation sends camelCase; both spellings land.
    let (status, v) = post_json(
        &app,
        "/ingest",
        json!({"chatId": "c1", "title": "News", "text": "Another development entirely."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "accepted");

    let (_, stats) = get_json(&app, "/stats").await;
    assert_eq!(stats["items"], 2);
    assert_eq!(stats["signals"], 0);
}

#[tokio::test]
async fn signals_list_paginates_and_caches() {
    let h = harness(MockLlm::scripted(vec![
        Ok(finding("story a", 85)),
        Ok(finding("story b", 85)),
    ]));
    let app = router_for(&h);

    for text in ["first body", "second body"] {
        post_json(&app, "/ingest", json!({"chat_id": "c1", "title": "News", "text": text})).await;
        h.coordinator.analyze_once().await;
    }

    let (status, v) = get_json(&app, "/signals?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["total"], 2);
    assert_eq!(v["limit"], 1);
    assert_eq!(v["offset"], 0);
    assert_eq!(v["signals"].as_array().unwrap().len(), 1);

    // limit is capped at 100.
    let (_, v) = get_json(&app, "/signals?limit=5000").await;
    assert_eq!(v["limit"], 100);

    // Filters narrow the result set.
    let (_, v) = get_json(&app, "/signals?q=story+a").await;
    assert_eq!(v["total"], 1);
    let (_, v) = get_json(&app, "/signals?sentiment=bullish").await;
    assert_eq!(v["total"], 0);

    // The unfiltered first page lands in the short-TTL cache.
    let (_, first) = get_json(&app, "/signals").await;
    assert_eq!(
        h.coordinator.cache.get("signals:limit=50").unwrap(),
        first,
        "first page is served from cache on repeat"
    );
}

#[tokio::test]
async fn signals_export_csv_and_sources() {
    let h = harness(MockLlm::scripted(vec![Ok(finding("exportable", 85))]));
    let app = router_for(&h);
    post_json(&app, "/ingest", json!({"chat_id": "c1", "title": "News", "text": "body"})).await;
    h.coordinator.analyze_once().await;

    let req = Request::builder()
        .uri("/signals/export?format=csv")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("id,created_at,"));
    assert!(text.contains("exportable"));

    let (_, v) = get_json(&app, "/signals/sources").await;
    assert_eq!(v["sources"], json!(["News"]));

    let (status, _) = get_json(&app, "/signals/export?format=xml").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slack_challenge_is_echoed() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);
    let (status, v) = post_json(
        &app,
        "/webhook/slack",
        json!({"type": "url_verification", "challenge": "tok-123"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["challenge"], "tok-123");
}

#[tokio::test]
async fn generic_webhook_ingests() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);
    let (status, _) = post_json(
        &app,
        "/webhook/generic",
        json!({"title": "Alerts", "text": "vol spike in rates"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.coordinator.store.stats().unwrap().items, 1);

    let (status, _) = post_json(&app, "/webhook/bogus", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn feed_registration_roundtrip() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);

    let (status, v) = post_json(
        &app,
        "/sources/feed",
        json!({"name": "Wire", "url": "https://wire.example/rss"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = v["id"].as_str().unwrap().to_string();

    let (_, v) = get_json(&app, "/sources/feed").await;
    assert_eq!(v["feeds"].as_array().unwrap().len(), 1);
    assert_eq!(v["feeds"][0]["name"], "Wire");

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/sources/feed?id={id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, v) = get_json(&app, "/sources/feed").await;
    assert!(v["feeds"].as_array().unwrap().is_empty());

    let (status, _) = post_json(
        &app,
        "/sources/feed",
        json!({"name": "Bad", "url": "ftp://nope"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_api_is_rate_limited_per_client() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);

    for i in 0..61 {
        let req = Request::builder()
            .uri("/stats")
            .header("x-forwarded-for", "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        if i < 60 {
            assert_eq!(resp.status(), StatusCode::OK, "request {i} within budget");
        } else {
            assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }

    // The budget spans the whole read API, /sources/feed included.
    let req = Request::builder()
        .uri("/sources/feed")
        .header("x-forwarded-for", "10.0.0.9")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different client is unaffected.
    let req = Request::builder()
        .uri("/stats")
        .header("x-forwarded-for", "10.0.0.10")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn sql_endpoint_is_select_only() {
    let h = harness(MockLlm::fixed("[]"));
    let app = router_for(&h);
    post_json(&app, "/ingest", json!({"chat_id": "c1", "title": "News", "text": "one item"})).await;

    let (status, v) = post_json(
        &app,
        "/sql",
        json!({"sql": "SELECT source_name FROM content_items"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["result"][0]["source_name"], "News");

    let (status, _) = post_json(&app, "/sql", json!({"sql": "DELETE FROM content_items"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_digest_requeues_items() {
    let h = harness(MockLlm::scripted(vec![
        Ok(finding("first pass", 20)),
        Ok(finding("second pass", 85)),
    ]));
    let app = router_for(&h);

    let (_, v) = post_json(
        &app,
        "/ingest",
        json!({"chat_id": "c1", "title": "News", "text": "[PDF DOCUMENT] quarterly outlook"}),
    )
    .await;
    let id = v["id"].as_str().unwrap().to_string();
    h.coordinator.analyze_once().await;
    assert_eq!(h.coordinator.store.stats().unwrap().signals, 0, "first pass scored low");

    let (status, v) = post_json(&app, "/admin/digest", json!({"sourceIds": [id]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["requeued"], 1);
    assert_eq!(
        h.coordinator.store.stats().unwrap().signals,
        1,
        "forced pass promoted the item"
    );

    let (status, _) = post_json(&app, "/admin/digest", json!({"source_ids": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
