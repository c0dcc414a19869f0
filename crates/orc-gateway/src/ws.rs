//! The `/ws` push channel (§6): one `SubscriberBuffer` per connection,
//! forwarded outbound as JSON-tagged `Delta`s; inbound frames are parsed as
//! `InboundMessage` actions (`get_full_status`, `get_chart_updates`).
//!
//! Grounded on `agentor-gateway/src/server.rs`'s `handle_socket` — same
//! split-socket/`send_task`+`recv_task`/`tokio::select!` shape — with the
//! teacher's single chat `InboundMessage`/welcome-frame taxonomy replaced by
//! the spec's delta/action types.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use orc_service::{Delta, InboundMessage};
use tracing::{info, warn};

use crate::http::full_status_delta;
use crate::state::GatewayState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, buffer) = state.service.subscribe().await;
    info!(connection_id = %connection_id, "ws connected");

    let send_service = state.service.clone();
    let send_buffer = buffer.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let delta = send_buffer.recv().await;
            let Ok(payload) = serde_json::to_string(&delta) else { continue };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = send_service;
    });

    let recv_service = state.service.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_inbound(&recv_service, &text, &buffer).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.service.unsubscribe(connection_id).await;
    info!(connection_id = %connection_id, "ws disconnected");
}

async fn handle_inbound(service: &orc_service::OrchestratorService, text: &str, buffer: &orc_service::SubscriberBuffer) {
    let inbound: InboundMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "ws: dropping unparseable inbound frame");
            return;
        }
    };

    let delta = match inbound {
        InboundMessage::GetFullStatus => full_status_delta(service).await,
        InboundMessage::GetChartUpdates => {
            let status = service.full_status().await;
            Delta::SpecificUpdate {
                fields: orc_service::SpecificFields { metrics: Some(status.metrics), ..Default::default() },
            }
        }
    };
    buffer.push(delta.clone(), || delta);
}
