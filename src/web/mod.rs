//! Admin HTTP/WebSocket surface
//!
//! Operational triggers, status, feed management, and two WebSocket
//! streams (log fan-out and progress events). Connections are bounded
//! (default 100), each with a read timeout and periodic heartbeat. CORS
//! comes from an explicit origin allowlist, never a wildcard.

mod logs;

pub use logs::{LogBroadcastLayer, LogEvent};

use crate::error::{Error, Result};
use crate::service::{BriefwireService, RunOptions};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

/// Shared state behind the admin routes
#[derive(Clone)]
pub struct AdminState {
    pub service: Arc<BriefwireService>,
    pub log_tx: broadcast::Sender<String>,
    ws_connections: Arc<AtomicUsize>,
    max_ws_connections: usize,
    ws_read_timeout: Duration,
    ws_heartbeat: Duration,
}

impl AdminState {
    pub fn new(service: Arc<BriefwireService>, log_tx: broadcast::Sender<String>) -> Self {
        let web = &service.config().web;
        Self {
            max_ws_connections: web.max_ws_connections,
            ws_read_timeout: Duration::from_secs(web.ws_read_timeout_secs),
            ws_heartbeat: Duration::from_secs(web.ws_heartbeat_secs),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            service,
            log_tx,
        }
    }
}

/// Build the admin router with the CORS allowlist applied.
pub fn router(state: AdminState) -> Result<Router> {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in &state.service.config().web.allowed_origins {
        origins.push(
            origin
                .parse()
                .map_err(|_| Error::Config(format!("invalid CORS origin: {}", origin)))?,
        );
    }
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request());

    Ok(Router::new()
        .route("/api/status", get(get_status))
        .route("/api/run", post(post_run))
        .route("/api/digest", post(post_digest))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/:id", delete(delete_article))
        .route("/api/feeds", get(list_feeds).post(add_feed).delete(remove_feed))
        .route("/api/feeds/:id", patch(toggle_feed))
        .route("/api/progress/state", get(progress_state))
        .route("/ws/logs", get(ws_logs))
        .route("/ws/progress", get(ws_progress))
        .with_state(state)
        .layer(cors))
}

/// Serve the admin surface until the process shuts down.
pub async fn serve(state: AdminState, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
    let config = state.service.config().web.clone();
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "Admin surface listening");

    let app = router(state)?;
    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| Error::Internal(format!("admin server: {}", e)))?;
    Ok(())
}

// ==================== API handlers ====================

async fn get_status(State(state): State<AdminState>) -> impl IntoResponse {
    let service = &state.service;
    let entity_stats = service.entity_store().stats().unwrap_or_default();
    let hot_entities = service
        .entity_store()
        .get_hot_entities(7, 5)
        .unwrap_or_default();
    Json(serde_json::json!({
        "running": service.is_running(),
        "mode": service.mode().as_str(),
        "stats": {
            "last_cycle": service.last_stats(),
            "articles": service.article_store().count().unwrap_or(0),
            "entities": entity_stats,
            "hot_entities": hot_entities,
            "last_error": service.last_error(),
        },
    }))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    limit: Option<usize>,
    #[serde(default)]
    dry_run: bool,
    concurrency: Option<usize>,
}

async fn post_run(
    State(state): State<AdminState>,
    body: Option<Json<RunRequest>>,
) -> impl IntoResponse {
    let service = state.service.clone();
    if !service.try_begin_run() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "already_running"})),
        );
    }

    let request = body.map(|Json(r)| r).unwrap_or(RunRequest {
        limit: None,
        dry_run: false,
        concurrency: None,
    });
    let options = RunOptions {
        limit: request.limit,
        dry_run: request.dry_run,
        concurrency: request.concurrency,
    };

    tokio::spawn(async move {
        let result = async {
            let stats = service.fetch_and_analyze(options).await?;
            service.send_digest(options.dry_run).await?;
            Ok::<_, Error>(stats)
        }
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin-triggered run failed");
        }
        service.end_run();
    });

    (StatusCode::OK, Json(serde_json::json!({"status": "started"})))
}

async fn post_digest(State(state): State<AdminState>) -> impl IntoResponse {
    let service = state.service.clone();
    if !service.try_begin_run() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "already_running"})),
        );
    }

    tokio::spawn(async move {
        if let Err(e) = service.send_digest(false).await {
            tracing::error!(error = %e, "Admin-triggered digest failed");
        }
        service.end_run();
    });

    (StatusCode::OK, Json(serde_json::json!({"status": "started"})))
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_articles(
    State(state): State<AdminState>,
    Query(paging): Query<Paging>,
) -> impl IntoResponse {
    match state.service.article_store().list(paging.limit, paging.offset) {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|row| {
                    serde_json::json!({
                        "url": row.article.url,
                        "title": row.article.title,
                        "source": row.article.source,
                        "category": row.article.category,
                        "published_at": row.article.published_at,
                        "fetched_at": row.article.fetched_at,
                        "score": row.overall_score,
                        "is_top_pick": row.is_top_pick,
                        "sent_at": row.sent_at,
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({"articles": items})))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn delete_article(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.article_store().delete(&id) {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({"status": "deleted"}))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "article not found"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn list_feeds(State(state): State<AdminState>) -> impl IntoResponse {
    match state.service.registry().list() {
        Ok(feeds) => (StatusCode::OK, Json(serde_json::json!({"feeds": feeds}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct FeedRequest {
    name: String,
    url: String,
    #[serde(default)]
    category: String,
}

async fn add_feed(
    State(state): State<AdminState>,
    Json(request): Json<FeedRequest>,
) -> impl IntoResponse {
    match state
        .service
        .registry()
        .add(&request.name, &request.url, &request.category)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "added"}))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct FeedIdentifier {
    identifier: String,
}

async fn remove_feed(
    State(state): State<AdminState>,
    Json(request): Json<FeedIdentifier>,
) -> impl IntoResponse {
    match state.service.registry().remove(&request.identifier) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "removed"}))),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

async fn toggle_feed(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> impl IntoResponse {
    match state.service.registry().set_enabled(&id, request.enabled) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "updated"}))),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn progress_state(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.service.progress_state())
}

// ==================== WebSocket handlers ====================

async fn ws_logs(
    State(state): State<AdminState>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    if !try_claim_connection(&state) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let rx = state.log_tx.subscribe();
    ws.on_upgrade(move |socket| async move {
        stream_to_socket(socket, rx, state.ws_read_timeout, state.ws_heartbeat).await;
        state.ws_connections.fetch_sub(1, Ordering::SeqCst);
    })
    .into_response()
}

async fn ws_progress(
    State(state): State<AdminState>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    if !try_claim_connection(&state) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let rx = state.service.subscribe_progress();
    ws.on_upgrade(move |socket| async move {
        stream_to_socket(socket, rx, state.ws_read_timeout, state.ws_heartbeat).await;
        state.ws_connections.fetch_sub(1, Ordering::SeqCst);
    })
    .into_response()
}

fn try_claim_connection(state: &AdminState) -> bool {
    let current = state.ws_connections.fetch_add(1, Ordering::SeqCst);
    if current >= state.max_ws_connections {
        state.ws_connections.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(limit = state.max_ws_connections, "WS connection limit reached");
        false
    } else {
        true
    }
}

/// Pump broadcast events to the socket with heartbeats; drop the
/// connection when the peer stays silent past the read timeout.
async fn stream_to_socket<T: ToWsText + Clone + Send + 'static>(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<T>,
    read_timeout: Duration,
    heartbeat: Duration,
) {
    let mut heartbeat_tick = tokio::time::interval(heartbeat);
    heartbeat_tick.tick().await;
    let mut last_read = tokio::time::Instant::now();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if socket.send(Message::Text(event.to_ws_text())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "WS subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_read = tokio::time::Instant::now(),
                    Some(Err(_)) => break,
                }
            }
            _ = heartbeat_tick.tick() => {
                if last_read.elapsed() > read_timeout {
                    tracing::debug!("WS read timeout, closing");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

trait ToWsText {
    fn to_ws_text(&self) -> String;
}

impl ToWsText for String {
    fn to_ws_text(&self) -> String {
        self.clone()
    }
}

impl ToWsText for serde_json::Value {
    fn to_ws_text(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisMode;
    use tempfile::TempDir;

    fn admin_state() -> (AdminState, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = crate::AppConfig::default();
        config.storage.database_path = dir.path().join("test.db");
        config.telemetry.enabled = false;
        config.web.max_ws_connections = 2;
        let service = Arc::new(
            BriefwireService::new(config, dir.path().join("feeds.toml"), AnalysisMode::Standard)
                .unwrap(),
        );
        let (log_tx, _) = broadcast::channel(16);
        (AdminState::new(service, log_tx), dir)
    }

    #[test]
    fn test_router_builds_with_allowlist() {
        let (state, _dir) = admin_state();
        assert!(router(state).is_ok());
    }

    #[test]
    fn test_router_rejects_invalid_origin() {
        let (state, _dir) = admin_state();
        // An origin with a control character cannot become a HeaderValue
        let mut service_config = state.service.config().clone();
        service_config.web.allowed_origins = vec!["bad\norigin".to_string()];
        // Rebuild a service with the broken config
        let dir = TempDir::new().unwrap();
        let mut config = service_config;
        config.storage.database_path = dir.path().join("x.db");
        let service = Arc::new(
            BriefwireService::new(config, dir.path().join("feeds.toml"), AnalysisMode::Quick)
                .unwrap(),
        );
        let (log_tx, _) = broadcast::channel(4);
        assert!(router(AdminState::new(service, log_tx)).is_err());
    }

    #[test]
    fn test_connection_limit() {
        let (state, _dir) = admin_state();
        assert!(try_claim_connection(&state));
        assert!(try_claim_connection(&state));
        // Third connection is rejected (limit 2)
        assert!(!try_claim_connection(&state));
        state.ws_connections.fetch_sub(1, Ordering::SeqCst);
        assert!(try_claim_connection(&state));
    }
}
