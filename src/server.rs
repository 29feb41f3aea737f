use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{RwLock, watch};

use crate::approval::{ApprovalError, ApprovalRequest, Verdict};
use crate::config::RuntimeConfig;
use crate::memory::{FileLoadStatus, RESUME_KEY};
use crate::mission::{
    EventTrace, FailureReason, MissionCanceller, MissionController, MissionOutcome,
    MissionRequest, MissionStatus,
};
use crate::roles::RoleDescriptor;
use crate::telemetry::TelemetrySink;

pub const SERVER_AUTH_TOKEN_ENV: &str = "COPILOT_SERVER_AUTH_TOKEN";

/// Finished missions kept for `GET /v1/missions/{id}`.
pub const FINISHED_MISSION_RETENTION: usize = 128;

pub struct MissionRecord {
    pub query: String,
    pub status: watch::Receiver<MissionStatus>,
    pub trace: EventTrace,
    pub canceller: MissionCanceller,
    pub outcome: Option<MissionOutcome>,
}

/// Missions known to the server. Running missions are always kept; finished
/// ones are evicted oldest-first past the retention limit.
pub struct MissionTable {
    records: HashMap<String, MissionRecord>,
    finished: VecDeque<String>,
    retention: usize,
}

impl MissionTable {
    pub fn with_retention(retention: usize) -> Self {
        Self {
            records: HashMap::new(),
            finished: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    pub fn insert(&mut self, mission_id: String, record: MissionRecord) {
        self.records.insert(mission_id, record);
    }

    pub fn get(&self, mission_id: &str) -> Option<&MissionRecord> {
        self.records.get(mission_id)
    }

    pub fn record_outcome(&mut self, outcome: MissionOutcome) {
        let mission_id = outcome.mission_id.clone();
        let Some(record) = self.records.get_mut(&mission_id) else {
            return;
        };
        record.outcome = Some(outcome);
        self.finished.push_back(mission_id);
        while self.finished.len() > self.retention {
            if let Some(oldest) = self.finished.pop_front() {
                self.records.remove(&oldest);
                tracing::debug!(mission_id = %oldest, "Evicted finished mission record");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &MissionRecord> {
        self.records.values()
    }
}

impl Default for MissionTable {
    fn default() -> Self {
        Self::with_retention(FINISHED_MISSION_RETENTION)
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub cfg: RuntimeConfig,
    pub telemetry: TelemetrySink,
    pub controller: Arc<MissionController>,
    pub missions: Arc<RwLock<MissionTable>>,
    pub auth_token: Option<String>,
}

impl ServerState {
    pub fn new(cfg: RuntimeConfig, controller: Arc<MissionController>, telemetry: TelemetrySink) -> Self {
        Self {
            cfg,
            telemetry,
            controller,
            missions: Arc::new(RwLock::new(MissionTable::default())),
            auth_token: std::env::var(SERVER_AUTH_TOKEN_ENV)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub profile: String,
    pub generator: String,
}

#[derive(Debug, Deserialize)]
pub struct StartMissionRequest {
    pub query: String,
    pub role: Option<String>,
    /// Hold the response until the mission finishes or waits for approval.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct MissionView {
    pub mission_id: String,
    pub query: String,
    pub status: MissionStatus,
    pub final_text: Option<String>,
    pub failure: Option<FailureReason>,
    pub raw_event_log: Vec<String>,
    pub pending_approvals: Vec<ApprovalRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PutMemoryRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct RoleView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub sensitive_output: bool,
}

impl From<&RoleDescriptor> for RoleView {
    fn from(role: &RoleDescriptor) -> Self {
        Self {
            id: role.id.clone(),
            name: role.name.clone(),
            description: role.description.clone(),
            capabilities: role.capabilities.iter().cloned().collect(),
            sensitive_output: role.sensitive_output,
        }
    }
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn approval_api_error(err: ApprovalError) -> ApiError {
    let status = match err {
        ApprovalError::AlreadyResolved { .. } => StatusCode::CONFLICT,
        ApprovalError::UnknownRequest(_) => StatusCode::NOT_FOUND,
    };
    api_error(status, err.to_string())
}

pub fn check_server_auth(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
) -> Result<(), ApiError> {
    let Some(expected_token) = state.auth_token.as_deref() else {
        return Ok(());
    };

    let header_value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let provided_token = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();

    if provided_token.is_empty() || provided_token != expected_token {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization bearer token",
        ));
    }

    Ok(())
}

async fn mission_view(state: &ServerState, mission_id: &str) -> Option<MissionView> {
    let missions = state.missions.read().await;
    let record = missions.get(mission_id)?;
    let pending_approvals = state.controller.gate().pending_for_mission(mission_id);
    Some(match &record.outcome {
        Some(outcome) => MissionView {
            mission_id: mission_id.to_string(),
            query: record.query.clone(),
            status: outcome.status,
            final_text: Some(outcome.final_text.clone()),
            failure: outcome.failure.clone(),
            raw_event_log: outcome.raw_event_log.clone(),
            pending_approvals,
        },
        None => MissionView {
            mission_id: mission_id.to_string(),
            query: record.query.clone(),
            status: *record.status.borrow(),
            final_text: None,
            failure: None,
            raw_event_log: record.trace.lines(),
            pending_approvals,
        },
    })
}

pub async fn handle_server_health(
    State(state): State<Arc<ServerState>>,
) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        profile: state.cfg.profile.clone(),
        generator: state.controller.generator_name().to_string(),
    })
}

pub async fn handle_start_mission(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<StartMissionRequest>,
) -> std::result::Result<(StatusCode, Json<MissionView>), ApiError> {
    check_server_auth(&state, &headers)?;
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "query cannot be empty for /v1/missions",
        ));
    }

    let handle = state
        .controller
        .spawn(MissionRequest::new(query.clone()).with_role_hint(request.role));
    let mission_id = handle.id().to_string();
    let mut status = handle.status_receiver();
    state.missions.write().await.insert(
        mission_id.clone(),
        MissionRecord {
            query,
            status: status.clone(),
            trace: handle.trace(),
            canceller: handle.canceller(),
            outcome: None,
        },
    );
    state
        .telemetry
        .emit("server.mission.accepted", json!({ "mission_id": mission_id }));

    let missions = Arc::clone(&state.missions);
    let finished = tokio::spawn(async move {
        let outcome = handle.outcome().await;
        match outcome {
            Ok(outcome) => missions.write().await.record_outcome(outcome),
            Err(err) => tracing::warn!(error = %err, "server mission ended abnormally"),
        }
    });

    if request.wait {
        let _ = status
            .wait_for(|status| *status != MissionStatus::Running)
            .await;
        if status.borrow().is_terminal() {
            let _ = finished.await;
        }
    }

    let view = mission_view(&state, &mission_id).await.ok_or_else(|| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "mission record disappeared")
    })?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

pub async fn handle_get_mission(
    State(state): State<Arc<ServerState>>,
    Path(mission_id): Path<String>,
) -> ApiResult<MissionView> {
    mission_view(&state, &mission_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("mission '{mission_id}' not found")))
}

pub async fn handle_cancel_mission(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Path(mission_id): Path<String>,
) -> ApiResult<Value> {
    check_server_auth(&state, &headers)?;
    let canceller = {
        let missions = state.missions.read().await;
        let record = missions.get(&mission_id).ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("mission '{mission_id}' not found"))
        })?;
        let status = record
            .outcome
            .as_ref()
            .map(|outcome| outcome.status)
            .unwrap_or_else(|| *record.status.borrow());
        if status.is_terminal() {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({
                    "error": format!("mission '{mission_id}' already {}", status.label()),
                    "mission_id": mission_id,
                    "status": status,
                })),
            ));
        }
        record.canceller.clone()
    };
    canceller.cancel();
    state
        .telemetry
        .emit("server.mission.cancelled", json!({ "mission_id": mission_id }));
    Ok(Json(json!({ "mission_id": mission_id, "cancelled": true })))
}

pub async fn handle_list_approvals(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<ApprovalRequest>> {
    Json(state.controller.gate().pending())
}

async fn resolve_approval(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
    request_id: &str,
    verdict: Verdict,
) -> ApiResult<ApprovalRequest> {
    check_server_auth(state, headers)?;
    let request = state
        .controller
        .gate()
        .resolve(request_id, verdict)
        .map_err(approval_api_error)?;
    state.telemetry.emit(
        "server.approval.answered",
        json!({ "request_id": request.id, "decision": request.decision.label() }),
    );
    Ok(Json(request))
}

pub async fn handle_approve(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<ApprovalRequest> {
    resolve_approval(&state, &headers, &request_id, Verdict::Approved).await
}

pub async fn handle_reject(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<ApprovalRequest> {
    resolve_approval(&state, &headers, &request_id, Verdict::Rejected).await
}

pub async fn handle_list_memory(State(state): State<Arc<ServerState>>) -> Json<Vec<String>> {
    Json(state.controller.memory().list_keys())
}

pub async fn handle_get_memory(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
) -> ApiResult<Value> {
    let value = state
        .controller
        .memory()
        .get(&key)
        .map_err(|err| api_error(StatusCode::NOT_FOUND, err.to_string()))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

pub async fn handle_put_memory(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Path(key): Path<String>,
    Json(request): Json<PutMemoryRequest>,
) -> ApiResult<Value> {
    check_server_auth(&state, &headers)?;
    state.controller.memory().put(key.clone(), request.value);
    Ok(Json(json!({ "key": key, "stored": true })))
}

/// Re-read the configured résumé file into memory.
pub async fn handle_reload_memory(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
) -> ApiResult<Value> {
    check_server_auth(&state, &headers)?;
    let path = state.cfg.resume_path();
    let status = state
        .controller
        .memory()
        .load_file(RESUME_KEY, &path)
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    state.telemetry.emit(
        "memory.reloaded",
        json!({ "key": RESUME_KEY, "status": status.label() }),
    );
    Ok(Json(json!({
        "key": RESUME_KEY,
        "path": path.display().to_string(),
        "loaded": matches!(status, FileLoadStatus::Loaded { .. }),
        "status": status.label(),
    })))
}

pub async fn handle_list_roles(State(state): State<Arc<ServerState>>) -> Json<Vec<RoleView>> {
    Json(
        state
            .controller
            .dispatcher()
            .registry()
            .list()
            .iter()
            .map(|role| RoleView::from(role.as_ref()))
            .collect(),
    )
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/v1/missions", post(handle_start_mission))
        .route("/v1/missions/{id}", get(handle_get_mission))
        .route("/v1/missions/{id}/cancel", post(handle_cancel_mission))
        .route("/v1/approvals", get(handle_list_approvals))
        .route("/v1/approvals/{id}/approve", post(handle_approve))
        .route("/v1/approvals/{id}/reject", post(handle_reject))
        .route("/v1/memory", get(handle_list_memory))
        .route("/v1/memory/reload", post(handle_reload_memory))
        .route("/v1/memory/{key}", get(handle_get_memory).put(handle_put_memory))
        .route("/v1/roles", get(handle_list_roles))
        .with_state(state)
}

pub async fn run_server(
    cfg: RuntimeConfig,
    controller: Arc<MissionController>,
    host: String,
    port: u16,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    let state = Arc::new(ServerState::new(cfg.clone(), controller, telemetry.clone()));

    telemetry.emit(
        "server.started",
        json!({
            "host": host,
            "port": port,
            "profile": cfg.profile,
            "generator": state.controller.generator_name(),
        }),
    );

    println!(
        "Server mode listening on http://{} (health: /healthz, missions: /v1/missions, approvals: /v1/approvals)",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    let missions = Arc::clone(&state.missions);
    let result = axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed");

    for record in missions.read().await.values() {
        if record.outcome.is_none() {
            record.canceller.cancel();
        }
    }
    result
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}
