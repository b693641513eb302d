// src/api.rs
//! HTTP surface: webhooks and direct ingest in, read-only queries out.
//! Webhook handlers are best-effort 200 per the propagation policy; the
//! read API is rate limited per client.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;
use crate::ingest::collectors::webhook::{normalize_webhook, WebhookKind, WebhookPayload};
use crate::ingest::types::{IngestRecord, MediaRef};
use crate::ratelimit::RateLimiter;
use crate::store::{Channel, ChannelKind, ChannelStatus, Sentiment, SignalFilter};

const READ_LIMIT_PER_MINUTE: usize = 60;
const MAX_PAGE: usize = 100;
const MAX_EXPORT: usize = 1_000;
const MAX_SQL_ROWS: usize = 500;

pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    limiter: RateLimiter,
}

/// Build the application router around a running coordinator.
pub fn create_router(coordinator: Arc<Coordinator>) -> Router {
    let state = Arc::new(ApiState {
        coordinator,
        limiter: RateLimiter::per_minute(READ_LIMIT_PER_MINUTE),
    });

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook/chat", post(webhook_chat))
        .route("/webhook/:kind", post(webhook_kind))
        .route("/ingest", post(ingest))
        .route("/signals", get(signals_list))
        .route("/signals/export", get(signals_export))
        .route("/signals/sources", get(signals_sources))
        .route("/stats", get(stats))
        .route(
            "/sources/feed",
            get(feeds_list).post(feeds_add).delete(feeds_delete),
        )
        .route("/admin/digest", post(admin_digest))
        .route("/sql", post(sql_query))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

async fn health() -> &'static str {
    "OK"
}

/// Client key for rate limiting: first forwarded address, else local.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "local".to_string())
}

fn rate_limited(state: &ApiState, headers: &HeaderMap) -> Option<Response> {
    if state.limiter.check(&client_key(headers)) {
        None
    } else {
        Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "rate limit exceeded"})),
            )
                .into_response(),
        )
    }
}

fn internal_error(err: anyhow::Error) -> Response {
    tracing::warn!(error = ?err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}

// ---- webhooks ---------------------------------------------------------

async fn webhook_chat(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<JsonValue>,
) -> Response {
    match state.coordinator.on_chat_update(&body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => {
            tracing::warn!(error = ?err, "chat webhook failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error").into_response()
        }
    }
}

async fn webhook_kind(
    Extension(state): Extension<Arc<ApiState>>,
    Path(kind): Path<String>,
    Json(body): Json<JsonValue>,
) -> Response {
    let Some(kind) = WebhookKind::parse(&kind) else {
        return (StatusCode::NOT_FOUND, "unknown webhook kind").into_response();
    };
    match normalize_webhook(kind, &body) {
        WebhookPayload::Challenge(challenge) => {
            Json(json!({"challenge": challenge})).into_response()
        }
        WebhookPayload::Record(record) => {
            if let Err(err) = state.coordinator.route_inbound(record).await {
                tracing::warn!(error = ?err, "webhook ingest failed");
            }
            // Best-effort 200 either way; the sender cannot act on our errors.
            (StatusCode::OK, "OK").into_response()
        }
        WebhookPayload::Ignored => (StatusCode::OK, "OK").into_response(),
    }
}

// ---- direct ingest ----------------------------------------------------

#[derive(Deserialize)]
struct IngestReq {
    #[serde(alias = "chatId")]
    chat_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    media: Option<IngestMedia>,
}

#[derive(Deserialize)]
struct IngestMedia {
    url: String,
    #[serde(default, alias = "mimeType")]
    mime: Option<String>,
}

async fn ingest(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<IngestReq>,
) -> Response {
    let record = IngestRecord {
        chat_id: body.chat_id,
        message_id: None,
        title: body.title,
        text: body.text,
        media: body.media.map(|m| MediaRef {
            url: m.url,
            mime: m.mime,
        }),
    };
    match state.coordinator.ingest_direct(record).await {
        Ok(outcome) => Json(json!({
            "id": outcome.id(),
            "status": outcome.status(),
        }))
        .into_response(),
        Err(err) => internal_error(err),
    }
}

// ---- signals ----------------------------------------------------------

#[derive(Deserialize, Default)]
struct SignalsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    source: Option<String>,
    sentiment: Option<String>,
    urgent: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
    q: Option<String>,
    format: Option<String>,
}

fn filter_from_query(query: &SignalsQuery) -> SignalFilter {
    SignalFilter {
        source: query.source.clone().filter(|s| !s.is_empty()),
        sentiment: query
            .sentiment
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Sentiment::parse),
        urgent: query
            .urgent
            .as_deref()
            .map(|v| matches!(v, "1" | "true" | "yes")),
        from: query.from,
        to: query.to,
        q: query.q.clone().filter(|s| !s.is_empty()),
    }
}

async fn signals_list(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SignalsQuery>,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    let limit = query.limit.unwrap_or(50).min(MAX_PAGE);
    let offset = query.offset.unwrap_or(0);
    let filter = filter_from_query(&query);

    // The unfiltered first page is hot (dashboard home): 30s cache.
    let cache_key = (filter.is_empty() && offset == 0).then(|| format!("signals:limit={limit}"));
    if let Some(key) = &cache_key {
        if let Some(hit) = state.coordinator.cache.get(key) {
            return Json(hit).into_response();
        }
    }

    match state.coordinator.store.list_signals(&filter, limit, offset) {
        Ok((signals, total)) => {
            let body = json!({
                "signals": signals,
                "total": total,
                "limit": limit,
                "offset": offset,
            });
            if let Some(key) = &cache_key {
                state.coordinator.cache.put(key, body.clone());
            }
            Json(body).into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn signals_export(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SignalsQuery>,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    let limit = query.limit.unwrap_or(MAX_EXPORT).min(MAX_EXPORT);
    let filter = filter_from_query(&query);
    let (signals, _total) = match state.coordinator.store.list_signals(&filter, limit, 0) {
        Ok(out) => out,
        Err(err) => return internal_error(err),
    };

    match query.format.as_deref().unwrap_or("json") {
        "csv" => {
            let mut out = String::from(
                "id,created_at,source,sentiment,relevance_score,urgent,summary,tickers,tags\n",
            );
            for s in &signals {
                let esc = |v: &str| format!("\"{}\"", v.replace('"', "\"\""));
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{}\n",
                    s.id,
                    s.created_at,
                    esc(&s.source_name),
                    s.sentiment.as_str(),
                    s.relevance_score,
                    s.urgent,
                    esc(&s.summary),
                    esc(&s.tickers.join(" ")),
                    esc(&s.tags.join(" ")),
                ));
            }
            ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], out).into_response()
        }
        "json" => Json(json!(signals)).into_response(),
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown format: {other}")})),
        )
            .into_response(),
    }
}

async fn signals_sources(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    match state.coordinator.store.distinct_signal_sources() {
        Ok(sources) => Json(json!({"sources": sources})).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn stats(Extension(state): Extension<Arc<ApiState>>, headers: HeaderMap) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    match state.coordinator.store.stats() {
        Ok(stats) => Json(json!(stats)).into_response(),
        Err(err) => internal_error(err),
    }
}

// ---- feed registration ------------------------------------------------

async fn feeds_list(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    match state.coordinator.store.list_channels(Some(ChannelKind::Feed)) {
        Ok(feeds) => Json(json!({"feeds": feeds})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct FeedAddReq {
    name: String,
    url: String,
}

async fn feeds_add(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<FeedAddReq>,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    if !body.url.starts_with("http://") && !body.url.starts_with("https://") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "not a feed url"})),
        )
            .into_response();
    }
    let channel = Channel {
        id: uuid::Uuid::new_v4().to_string(),
        name: body.name,
        kind: ChannelKind::Feed,
        feed_url: Some(body.url),
        last_polled_at: None,
        success_count: 0,
        failure_count: 0,
        status: ChannelStatus::Active,
    };
    match state.coordinator.store.upsert_channel(&channel) {
        Ok(()) => Json(json!({"id": channel.id})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct FeedDeleteQuery {
    id: String,
}

async fn feeds_delete(
    Extension(state): Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<FeedDeleteQuery>,
) -> Response {
    if let Some(limited) = rate_limited(&state, &headers) {
        return limited;
    }
    match state.coordinator.store.delete_channel(&query.id) {
        Ok(found) => Json(json!({"ok": found})).into_response(),
        Err(err) => internal_error(err),
    }
}

// ---- admin ------------------------------------------------------------

#[derive(Deserialize)]
struct AdminDigestReq {
    #[serde(default, alias = "sourceIds")]
    source_ids: Vec<String>,
}

async fn admin_digest(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<AdminDigestReq>,
) -> Response {
    if body.source_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "source_ids is required"})),
        )
            .into_response();
    }
    match state.coordinator.force_reanalyze(&body.source_ids).await {
        Ok(requeued) => Json(json!({"requeued": requeued})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct SqlReq {
    sql: String,
}

async fn sql_query(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<SqlReq>,
) -> Response {
    match state.coordinator.store.select_rows(&body.sql, MAX_SQL_ROWS) {
        Ok(rows) => Json(json!({"result": rows})).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
