use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

use crate::alert::{AlertBook, NewAlert};
use crate::analytics::AnalyticsEngine;
use crate::config::parse_interval_ms;
use crate::delivery::TickHub;
use crate::feed::synthetic::seed_history;
use crate::ingest::Ingestor;
use crate::model::tick::{is_valid_symbol, normalize_symbol, Tick};
use crate::store::TickStore;

/// Ticks per symbol returned by `/api/initial-data`.
pub const INITIAL_TICKS: usize = 100;
const DEFAULT_STATS_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TickStore>,
    pub engine: AnalyticsEngine,
    pub ingestor: Arc<Ingestor>,
    pub hub: TickHub,
    pub alerts: Arc<AlertBook>,
    pub default_timeframe: String,
    pub default_window: usize,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn canonical_symbol(raw: &str) -> Result<String, ApiError> {
    let symbol = normalize_symbol(raw);
    if is_valid_symbol(&symbol) {
        Ok(symbol)
    } else {
        Err(ApiError::BadRequest(format!("invalid symbol '{}'", raw)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/symbols", get(list_symbols).post(add_symbol))
        .route("/api/symbols/{symbol}", delete(remove_symbol))
        .route("/api/start-collection", post(start_collection))
        .route("/api/stop-collection", post(stop_collection))
        .route("/api/initial-data", get(initial_data))
        .route("/api/ticks/{symbol}", get(export_ticks))
        .route("/api/stats/{symbol}", get(symbol_stats))
        .route("/api/calculate-analytics", post(calculate_analytics))
        .route("/api/generate-test-data", post(generate_test_data))
        .route("/api/alerts", get(list_alerts).post(create_alert))
        .route("/api/alerts/{id}", delete(delete_alert))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve until `shutdown` flips to true.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let mut shutdown = state.shutdown.clone();
    let addr = listener.local_addr().context("listener has no local address")?;
    tracing::info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("HTTP server error")
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "collecting": state.ingestor.is_running().await,
        "source": state.ingestor.source_name(),
        "symbols": state.ingestor.symbols(),
        "ingest": state.ingestor.stats(),
        "subscribers": state.hub.subscriber_count(),
    }))
}

async fn list_symbols(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "symbols": state.ingestor.symbols(),
        "stored": state.store.symbols(),
    }))
}

#[derive(Debug, Deserialize)]
struct SymbolBody {
    symbol: String,
}

async fn add_symbol(
    State(state): State<AppState>,
    Json(body): Json<SymbolBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let added = state
        .ingestor
        .add_symbol(&body.symbol)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(json!({
        "added": added,
        "symbols": state.ingestor.symbols(),
    })))
}

async fn remove_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.ingestor.remove_symbol(&symbol);
    Json(json!({
        "removed": removed,
        "symbols": state.ingestor.symbols(),
    }))
}

async fn start_collection(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = if state.ingestor.start().await {
        "started"
    } else {
        "already_running"
    };
    Json(json!({ "status": status }))
}

async fn stop_collection(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = if state.ingestor.stop().await {
        "stopped"
    } else {
        "not_running"
    };
    Json(json!({ "status": status }))
}

async fn initial_data(State(state): State<AppState>) -> Json<BTreeMap<String, Vec<Tick>>> {
    let data = state
        .ingestor
        .symbols()
        .into_iter()
        .map(|symbol| {
            let ticks = state.store.latest(&symbol, INITIAL_TICKS);
            (symbol, ticks)
        })
        .collect();
    Json(data)
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    from_ms: Option<u64>,
    to_ms: Option<u64>,
    format: Option<String>,
}

async fn export_ticks(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let symbol = canonical_symbol(&symbol)?;
    let ticks = state.store.range(
        &symbol,
        q.from_ms.unwrap_or(0),
        q.to_ms.unwrap_or(u64::MAX),
    );
    match q.format.as_deref().unwrap_or("json") {
        "json" => Ok(Json(ticks).into_response()),
        "csv" => Ok((
            [(header::CONTENT_TYPE, "text/csv")],
            ticks_to_csv(&ticks),
        )
            .into_response()),
        other => Err(ApiError::BadRequest(format!("unsupported format '{}'", other))),
    }
}

pub fn ticks_to_csv(ticks: &[Tick]) -> String {
    let mut out = String::from("symbol,timestamp_ms,price,size,side\n");
    for t in ticks {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            t.symbol,
            t.timestamp_ms,
            t.price,
            t.size,
            t.side.as_str()
        ));
    }
    out
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    limit: Option<usize>,
}

async fn symbol_stats(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let symbol = canonical_symbol(&symbol)?;
    let summary = state
        .engine
        .summarize(&symbol, q.limit.unwrap_or(DEFAULT_STATS_LIMIT));
    Ok(Json(summary).into_response())
}

#[derive(Debug, Deserialize)]
struct AnalyticsRequest {
    symbol1: String,
    symbol2: String,
    timeframe: Option<String>,
    window_size: Option<usize>,
}

async fn calculate_analytics(
    State(state): State<AppState>,
    Json(req): Json<AnalyticsRequest>,
) -> Result<Response, ApiError> {
    let symbol1 = canonical_symbol(&req.symbol1)?;
    let symbol2 = canonical_symbol(&req.symbol2)?;
    let timeframe = req.timeframe.unwrap_or_else(|| state.default_timeframe.clone());
    let interval_ms =
        parse_interval_ms(&timeframe).map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?;
    let window_size = req.window_size.unwrap_or(state.default_window);

    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        engine.analyze(&symbol1, &symbol2, interval_ms, window_size)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(result).into_response())
}

async fn generate_test_data(State(state): State<AppState>) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let symbols = state.ingestor.symbols();
    let written = tokio::task::spawn_blocking(move || seed_history(&store, &symbols))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "status": "generated", "ticks": written })).into_response())
}

async fn list_alerts(State(state): State<AppState>) -> Response {
    Json(state.alerts.list()).into_response()
}

async fn create_alert(
    State(state): State<AppState>,
    Json(body): Json<NewAlert>,
) -> Result<Response, ApiError> {
    let alert = state
        .alerts
        .create(body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!(alert_id = alert.id, symbol = %alert.symbol, "Alert created");
    Ok((StatusCode::CREATED, Json(alert)).into_response())
}

async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.alerts.remove(id) {
        Ok(Json(json!({ "removed": id })))
    } else {
        Err(ApiError::NotFound(format!("alert {} not found", id)))
    }
}

/// Commands a display client may send over `/ws`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    AddSymbol { symbol: String },
    RemoveSymbol { symbol: String },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut rx = state.hub.subscribe();
    let mut shutdown = state.shutdown.clone();
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(subscribers = state.hub.subscriber_count(), "WS client connected");

    let hello = json!({ "type": "status", "data": { "status": "connected" } });
    if sender
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "WS client lagged, skipped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => handle_command(&state, cmd),
                            Err(e) => tracing::debug!(error = %e, "Ignoring WS client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown_signalled(&mut shutdown) => break,
        }
    }
    tracing::info!("WS client disconnected");
}

/// Resolves once shutdown is true, including when it already was before the
/// receiver was cloned, or when the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn handle_command(state: &AppState, cmd: ClientCommand) {
    match cmd {
        ClientCommand::AddSymbol { symbol } => {
            if let Err(e) = state.ingestor.add_symbol(&symbol) {
                tracing::debug!(symbol = %symbol, error = %e, "WS add_symbol rejected");
            }
        }
        ClientCommand::RemoveSymbol { symbol } => {
            state.ingestor.remove_symbol(&symbol);
        }
    }
}
