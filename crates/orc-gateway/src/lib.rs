//! The Orchestrator's HTTP + WebSocket surface (§6): operator lifecycle
//! controls, config endpoints, the file viewer, liveness, and the `/ws` push
//! channel. Grounded on `agentor-gateway/src/server.rs`'s `Router` assembly
//! (`axum::Router::new().route(...).with_state(...)`, `TraceLayer`/`CorsLayer`
//! middleware stack) — the teacher's own chat-session routes are replaced
//! wholesale by the routes named in §6.

pub mod http;
pub mod state;
pub mod ws;

pub use state::{AgentGroup, GatewayState};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full axum `Router` for the control plane, wired to `state`.
/// The caller owns binding and serving it (§10 `orc-cli`).
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/start_{suffix}", post(http::start_group))
        .route("/stop_{suffix}", post(http::stop_group))
        .route("/start_all", post(http::start_all))
        .route("/stop_all", post(http::stop_all))
        .route("/clear", post(http::clear))
        .route("/clear_repo", post(http::clear_repo))
        .route("/update_config", post(http::update_config))
        .route("/update_config_item", post(http::update_config_item))
        .route("/file_content", get(http::file_content))
        .route("/health", get(http::health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
