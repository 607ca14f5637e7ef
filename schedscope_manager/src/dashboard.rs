//! Web dashboard: JSON API over the supervisor plus a live websocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{sink::SinkExt, stream::StreamExt};
use schedscope_core::playback::{max_tick_of, visible_at};
use schedscope_core::{
    export_report, reconstruct_metrics, reconstruct_timeline, LaunchConfig, ReportFormat, RunId,
    SchedulerEvent, SchedulerSummary, ScopeConfig, ScopeError, Subscription, Supervisor, Topic,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct AppState {
    pub supervisor: Supervisor,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(supervisor: Supervisor, port: u16) -> Self {
        Self {
            supervisor,
            port,
            started_at: Utc::now(),
        }
    }
}

type ApiResponse = (StatusCode, Json<Value>);
type ApiResult = Result<ApiResponse, ApiResponse>;

fn error_response(e: ScopeError) -> ApiResponse {
    let status = match &e {
        ScopeError::NotFound(_) => StatusCode::NOT_FOUND,
        ScopeError::InvalidInput(_) | ScopeError::Config(_) | ScopeError::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        ScopeError::LimitReached(_) | ScopeError::RunSealed(_) | ScopeError::RunActive(_) => {
            StatusCode::CONFLICT
        }
        ScopeError::LaunchFailed { run_id, message } => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": format!("Scheduler failed to launch: {}", message),
                    "run_id": run_id,
                })),
            )
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn parse_id(raw: &str) -> Result<RunId, ApiResponse> {
    raw.parse::<RunId>().map_err(error_response)
}

/// Events of a run, loading stored runs on first access
fn run_events(state: &AppState, raw: &str) -> Result<(RunId, Vec<Arc<SchedulerEvent>>), ApiResponse> {
    let run_id = parse_id(raw)?;
    state.supervisor.ensure_loaded(run_id).map_err(error_response)?;
    let events = state.supervisor.log().read(run_id, 0).map_err(error_response)?;
    Ok((run_id, events))
}

/// Events visible with the cursor at `tick`, or all of them
fn at_tick(events: &[Arc<SchedulerEvent>], tick: Option<u64>) -> (u64, Vec<Arc<SchedulerEvent>>) {
    let max_tick = max_tick_of(events);
    match tick {
        Some(tick) => (tick.min(max_tick), visible_at(events, tick)),
        None => (max_tick, events.to_vec()),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/runs", get(runs_list_handler).post(runs_start_handler))
        .route("/api/runs/:id", get(run_get_handler).delete(run_delete_handler))
        .route("/api/runs/:id/stop", post(run_stop_handler))
        .route("/api/runs/:id/events", get(run_events_handler))
        .route("/api/runs/:id/timeline", get(run_timeline_handler))
        .route("/api/runs/:id/metrics", get(run_metrics_handler))
        .route("/api/runs/:id/report", get(run_report_handler))
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(
                    |origin: &axum::http::HeaderValue, _| {
                        let origin = origin.to_str().unwrap_or("");
                        origin.starts_with("http://localhost")
                            || origin.starts_with("http://127.0.0.1")
                    },
                ))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
}

/// Serve the dashboard until Ctrl+C, then kill any running runs
pub async fn run(config: ScopeConfig) -> anyhow::Result<()> {
    use colored::Colorize;

    let port = config.server.port;
    let supervisor = Supervisor::from_config(&config);
    let app = router(Arc::new(AppState::new(supervisor.clone(), port)));

    println!("{}", "schedscope dashboard is running".green().bold());
    println!(
        "   • API:       {}",
        format!("http://localhost:{}/api/status", port).bright_blue()
    );
    println!(
        "   • Live feed: {}",
        format!("ws://localhost:{}/api/ws?run_id=<id>", port).bright_blue()
    );
    println!("   • Scheduler: {}", config.scheduler.binary);
    println!("   • Runs:      {}", config.store.dir.display());
    println!("\n   Press {} to stop", "Ctrl+C".bright_red());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let hub = supervisor.broadcaster().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down dashboard");
            // Ends open websocket streams so the server can drain
            hub.shutdown();
        })
        .await?;

    supervisor.shutdown().await;
    Ok(())
}

// ============================================================================
// Status and runs
// ============================================================================

pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let supervisor = &state.supervisor;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "port": state.port,
            "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
            "active_runs": supervisor.running_count(),
            "session_runs": supervisor.runs().len(),
            "subscribers": supervisor.broadcaster().subscriber_count(),
            "scheduler": supervisor.config().binary,
            "max_concurrent_runs": supervisor.config().max_concurrent_runs,
        })),
    )
}

/// Runs of this session plus everything in the store, newest first
pub async fn runs_list_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut runs = state.supervisor.runs();
    let known: HashSet<RunId> = runs.iter().map(|r| r.run_id).collect();
    match state.supervisor.store().list_runs() {
        Ok(stored) => runs.extend(stored.into_iter().filter(|r| !known.contains(&r.run_id))),
        Err(e) => tracing::warn!("Failed to list stored runs: {}", e),
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    (
        StatusCode::OK,
        Json(json!({
            "count": runs.len(),
            "runs": runs,
        })),
    )
}

pub async fn runs_start_handler(
    State(state): State<Arc<AppState>>,
    Json(launch): Json<LaunchConfig>,
) -> ApiResult {
    let run_id = state.supervisor.start(launch).await.map_err(error_response)?;
    tracing::info!("Started run {} from dashboard", run_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "run_id": run_id,
            "status": "running",
        })),
    ))
}

pub async fn run_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let run_id = parse_id(&id)?;
    let run = state.supervisor.find(run_id).map_err(error_response)?;
    let stderr = state
        .supervisor
        .store()
        .load_stderr(run_id)
        .unwrap_or_default();
    Ok((
        StatusCode::OK,
        Json(json!({
            "run": run,
            "stderr": stderr,
        })),
    ))
}

pub async fn run_delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let run_id = parse_id(&id)?;
    state.supervisor.delete(run_id).map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!("Deleted run {}", run_id),
        })),
    ))
}

/// Stopping a run that already ended is a no-op
pub async fn run_stop_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let run_id = parse_id(&id)?;
    let stopped = match state.supervisor.stop(run_id).await {
        Ok(stopped) => stopped,
        Err(e) if e.is_not_found() && state.supervisor.store().exists(run_id) => false,
        Err(e) => return Err(error_response(e)),
    };
    Ok((
        StatusCode::OK,
        Json(json!({
            "run_id": run_id,
            "stopped": stopped,
        })),
    ))
}

// ============================================================================
// Events and reconstruction
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Return events with a sequence greater than this
    pub from: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TickQuery {
    pub tick: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
    pub tick: Option<u64>,
}

pub async fn run_events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult {
    let run_id = parse_id(&id)?;
    state.supervisor.ensure_loaded(run_id).map_err(error_response)?;
    let log = state.supervisor.log();
    let events = log
        .read(run_id, query.from.unwrap_or(0))
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "run_id": run_id,
            "count": events.len(),
            "last_sequence": log.last_sequence(run_id),
            "sealed": log.is_sealed(run_id),
            "events": events,
        })),
    ))
}

pub async fn run_timeline_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TickQuery>,
) -> ApiResult {
    let (run_id, events) = run_events(&state, &id)?;
    let max_tick = max_tick_of(&events);
    let (tick, visible) = at_tick(&events, query.tick);
    Ok((
        StatusCode::OK,
        Json(json!({
            "run_id": run_id,
            "tick": tick,
            "max_tick": max_tick,
            "timeline": reconstruct_timeline(&visible),
        })),
    ))
}

pub async fn run_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TickQuery>,
) -> ApiResult {
    let (run_id, events) = run_events(&state, &id)?;
    let max_tick = max_tick_of(&events);
    let (tick, visible) = at_tick(&events, query.tick);
    let summary = visible
        .iter()
        .rev()
        .find_map(|e| SchedulerSummary::from_event(e));
    Ok((
        StatusCode::OK,
        Json(json!({
            "run_id": run_id,
            "tick": tick,
            "max_tick": max_tick,
            "metrics": reconstruct_metrics(&visible),
            "summary": summary,
        })),
    ))
}

pub async fn run_report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiResponse> {
    let format: ReportFormat = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse()
        .map_err(error_response)?;
    let (_, events) = run_events(&state, &id)?;
    let (_, visible) = at_tick(&events, query.tick);
    let timeline = reconstruct_timeline(&visible);
    let metrics = reconstruct_metrics(&visible);
    let body = export_report(&metrics, Some(&timeline), format).map_err(error_response)?;

    let content_type = match format {
        ReportFormat::Csv => "text/csv; charset=utf-8",
        ReportFormat::Markdown => "text/markdown; charset=utf-8",
        ReportFormat::Json => "application/json",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

// ============================================================================
// Live feed
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Omit to follow every run
    pub run_id: Option<String>,
    /// Backlog starts after this sequence
    pub last_seen: Option<u64>,
}

/// Backlog since `last_seen`, then live `{type, run_id, payload}` messages
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Response {
    let subscription = match subscribe(&state, &query) {
        Ok(subscription) => subscription,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| stream_subscription(socket, subscription))
}

fn subscribe(state: &AppState, query: &WsQuery) -> Result<Subscription, ApiResponse> {
    let Some(raw) = query.run_id.as_deref() else {
        return Ok(state.supervisor.broadcaster().subscribe(Topic::All));
    };
    let run_id = parse_id(raw)?;
    state.supervisor.ensure_loaded(run_id).map_err(error_response)?;
    state
        .supervisor
        .broadcaster()
        .attach(state.supervisor.log(), run_id, query.last_seen.unwrap_or(0))
        .map_err(error_response)
}

async fn stream_subscription(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            message = subscription.recv() => {
                let message = match message {
                    Ok(message) => message,
                    Err(reason) => {
                        // Client resynchronizes with last_seen on reconnect
                        let notice = json!({
                            "type": "disconnected",
                            "reason": reason.to_string(),
                        });
                        let _ = sender.send(Message::Text(notice.to_string())).await;
                        break;
                    }
                };
                let text = match serde_json::to_string(&message.to_envelope()) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to encode live message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break; // Client disconnected
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    let _ = sender.close().await;
}
