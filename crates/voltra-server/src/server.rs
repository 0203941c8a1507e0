use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;

use voltra_core::PushEvent;

use crate::channel::ChannelRegistry;
use crate::dispatch;
use crate::session::Session;

/// Service name reported by the status endpoint.
pub const SERVICE_NAME: &str = "Voltra Relay";

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    /// Per-channel outbound frame queue. Responses wait for space; pushes
    /// are dropped when it is full.
    pub push_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            bind: "0.0.0.0".to_string(),
            push_queue_size: 64,
        }
    }
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub registry: Arc<ChannelRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/", get(status_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle that keeps the serve task
/// alive and reports the bound port (useful with port 0).
pub async fn start(config: ServerConfig, session: Arc<Session>) -> std::io::Result<ServerHandle> {
    let registry = Arc::clone(session.registry());
    let router = build_router(AppState { session, registry });

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.bind, config.port)).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port = port, "Relay server listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port,
        _server: server,
    })
}

pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one control connection: attach (superseding any previous channel),
/// deliver the initial status push, then serve requests until the socket
/// closes or a newer channel takes over.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (channel_id, mut rx, cancel) = state.registry.attach();
    tracing::info!(channel_id = %channel_id, "Control channel attached");

    // Writer task: drain the outbound queue into the socket. The queue is
    // the only path to the socket, so frame order is queue order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // First frame a client sees: where the session already stands.
    let status = state.session.status();
    state.registry.push_or_log(&PushEvent::Status {
        connected: status.connected,
        device: status.device,
    });

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch::dispatch_frame(&state.session, &state.registry, &channel_id, &text)
                            .await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary, ping, pong
                    Some(Err(e)) => {
                        tracing::debug!(channel_id = %channel_id, error = %e, "Socket error");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!(channel_id = %channel_id, "Channel superseded, closing socket");
                break;
            }
        }
    }

    state.registry.detach(&channel_id);
    // Detach dropped the queue sender, so the writer drains and exits.
    let _ = writer.await;
    tracing::info!(channel_id = %channel_id, "Control channel detached");
}

/// Liveness plus the current session snapshot, for humans and healthchecks.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.session.status();
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "connected": status.connected,
        "device": status.device,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltra_ble::mock::{MockDevice, MockTransport};
    use voltra_ble::profile::DeviceProfile;
    use voltra_core::DeviceId;

    fn make_state() -> (Arc<MockTransport>, AppState) {
        let transport = Arc::new(MockTransport::new());
        transport.add_device(MockDevice::voltra("dev-1", "VTR-A"));
        let registry = Arc::new(ChannelRegistry::new(64));
        let session = Arc::new(Session::new(
            transport.clone(),
            DeviceProfile::default(),
            Arc::clone(&registry),
        ));
        (transport, AppState { session, registry })
    }

    #[tokio::test]
    async fn server_starts_and_reports_status() {
        let (_transport, state) = make_state();
        let config = ServerConfig {
            port: 0,
            bind: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let handle = start(config, Arc::clone(&state.session)).await.unwrap();

        let body: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{}/", handle.port))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "Voltra Relay");
        assert_eq!(body["connected"], false);
        assert!(body["device"].is_null());
    }

    #[tokio::test]
    async fn status_endpoint_reflects_connection() {
        let (_transport, state) = make_state();
        let config = ServerConfig {
            port: 0,
            bind: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let handle = start(config, Arc::clone(&state.session)).await.unwrap();

        state
            .session
            .connect(DeviceId::from_raw("dev-1"), Some("VTR-A".to_string()))
            .await
            .unwrap();

        let body: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{}/", handle.port))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(body["connected"], true);
        assert_eq!(body["device"]["name"], "VTR-A");
    }
}
