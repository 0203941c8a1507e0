use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use voltra_core::{DeviceId, PushEvent, RelayError};

use crate::channel::{ChannelId, ChannelRegistry};
use crate::rpc::{self, ConnectParams, Request, Response, ScanParams, WriteParams};
use crate::session::Session;

/// Upper bound on the scan window. Anything outside [0, MAX] is a client
/// mistake, not a scan we should sit on.
const MAX_SCAN_TIMEOUT_SECS: f64 = 300.0;

/// Process one inbound frame and route the outcome: a correlated response
/// when the request carried an id, an error push when a failing request
/// did not, nothing on an id-less success.
pub async fn dispatch_frame(
    session: &Arc<Session>,
    registry: &ChannelRegistry,
    channel_id: &ChannelId,
    raw: &str,
) {
    let request: Request = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            let error = RelayError::MalformedRequest(e.to_string());
            tracing::warn!(error_kind = error.error_kind(), "Rejected inbound frame");
            registry.push_or_log(&PushEvent::Error {
                error: error.to_string(),
            });
            return;
        }
    };

    let id = request.id.clone();
    let action = request.action.clone();
    let result = execute(session, request).await;

    match (id, result) {
        (Some(id), Ok(data)) => {
            respond(registry, channel_id, Response::ok(id, data)).await;
        }
        (Some(id), Err(e)) => {
            tracing::warn!(action = %action, error_kind = e.error_kind(), error = %e, "Request failed");
            respond(registry, channel_id, Response::fail(id, e.to_string())).await;
        }
        (None, Ok(_)) => {}
        (None, Err(e)) => {
            tracing::warn!(action = %action, error_kind = e.error_kind(), error = %e, "Request without id failed");
            registry.push_or_log(&PushEvent::Error {
                error: e.to_string(),
            });
        }
    }
}

async fn execute(session: &Arc<Session>, request: Request) -> Result<Value, RelayError> {
    match request.action.as_str() {
        "scan" => {
            let params: ScanParams = rpc::parse_params(request.params)?;
            if !params.timeout.is_finite()
                || params.timeout < 0.0
                || params.timeout > MAX_SCAN_TIMEOUT_SECS
            {
                return Err(RelayError::MalformedRequest(format!(
                    "scan timeout out of range: {}",
                    params.timeout
                )));
            }
            let devices = session.scan(Duration::from_secs_f64(params.timeout)).await?;
            Ok(json!(devices))
        }
        "connect" => {
            let params: ConnectParams = rpc::parse_params(request.params)?;
            let device = session
                .connect(DeviceId::from_raw(params.device_id), params.device_name)
                .await?;
            Ok(json!({ "status": "connected", "device": device }))
        }
        "disconnect" => {
            session.disconnect().await;
            Ok(json!({ "status": "disconnected" }))
        }
        "write" => {
            let params: WriteParams = rpc::parse_params(request.params)?;
            let payload = rpc::decode_payload(&params.data)?;
            session.write(&payload).await?;
            Ok(json!({ "status": "ok" }))
        }
        "status" => Ok(json!(session.status())),
        other => Err(RelayError::UnknownAction(other.to_string())),
    }
}

async fn respond(registry: &ChannelRegistry, channel_id: &ChannelId, response: Response) {
    match serde_json::to_string(&response) {
        Ok(frame) => {
            if !registry.send(channel_id, frame).await {
                tracing::warn!(channel_id = %channel_id, "Response dropped, channel superseded");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
    }
}
