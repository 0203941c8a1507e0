use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use voltra_core::RelayError;

/// Inbound control frame. Action parameters ride flat in the envelope next
/// to `id` and `action`; unrecognized keys are ignored.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: Option<String>,
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Correlated reply to a request that carried an id. Exactly one of `data`
/// and `error` is present, by construction.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: String, data: Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(id: String, error: impl Into<String>) -> Self {
        Self {
            id,
            data: None,
            error: Some(error.into()),
        }
    }
}

fn default_scan_timeout() -> f64 {
    5.0
}

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    /// Scan window in seconds.
    #[serde(default = "default_scan_timeout")]
    pub timeout: f64,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub device_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteParams {
    /// Hex-encoded payload.
    pub data: String,
}

/// Deserialize an action's parameters from the envelope remainder.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Map<String, Value>) -> Result<T, RelayError> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| RelayError::MalformedRequest(e.to_string()))
}

/// Decode a hex payload for a write action.
pub fn decode_payload(data: &str) -> Result<Vec<u8>, RelayError> {
    hex::decode(data).map_err(|e| RelayError::MalformedRequest(format!("invalid hex payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_parses_flat_envelope() {
        let request: Request = serde_json::from_str(
            r#"{"id":"7","action":"connect","device_id":"dev-1","device_name":"VTR-A"}"#,
        )
        .unwrap();
        assert_eq!(request.id.as_deref(), Some("7"));
        assert_eq!(request.action, "connect");

        let params: ConnectParams = parse_params(request.params).unwrap();
        assert_eq!(params.device_id, "dev-1");
        assert_eq!(params.device_name.as_deref(), Some("VTR-A"));
    }

    #[test]
    fn request_id_is_optional() {
        let request: Request = serde_json::from_str(r#"{"action":"status"}"#).unwrap();
        assert_eq!(request.id, None);
        assert_eq!(request.action, "status");
        assert!(request.params.is_empty());
    }

    #[test]
    fn scan_timeout_defaults() {
        let request: Request = serde_json::from_str(r#"{"id":"1","action":"scan"}"#).unwrap();
        let params: ScanParams = parse_params(request.params).unwrap();
        assert_eq!(params.timeout, 5.0);

        let request: Request =
            serde_json::from_str(r#"{"id":"1","action":"scan","timeout":2.5}"#).unwrap();
        let params: ScanParams = parse_params(request.params).unwrap();
        assert_eq!(params.timeout, 2.5);
    }

    #[test]
    fn missing_params_are_reported() {
        let request: Request = serde_json::from_str(r#"{"id":"1","action":"connect"}"#).unwrap();
        let err = parse_params::<ConnectParams>(request.params).unwrap_err();
        assert!(err.to_string().contains("device_id"));
        assert_eq!(err.error_kind(), "malformed_request");
    }

    #[test]
    fn unknown_params_are_ignored() {
        let request: Request =
            serde_json::from_str(r#"{"id":"1","action":"write","data":"ff","extra":42}"#).unwrap();
        let params: WriteParams = parse_params(request.params).unwrap();
        assert_eq!(params.data, "ff");
    }

    #[test]
    fn response_has_exactly_one_body_field() {
        let ok = serde_json::to_string(&Response::ok("1".to_string(), json!({"status": "ok"})))
            .unwrap();
        assert!(ok.contains("\"data\""));
        assert!(!ok.contains("\"error\""));

        let fail = serde_json::to_string(&Response::fail("2".to_string(), "Not connected")).unwrap();
        assert!(fail.contains("\"error\":\"Not connected\""));
        assert!(!fail.contains("\"data\""));
    }

    #[test]
    fn payload_decoding() {
        assert_eq!(decode_payload("0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_payload("").unwrap(), Vec::<u8>::new());

        let err = decode_payload("abc").unwrap_err();
        assert_eq!(err.error_kind(), "malformed_request");
        let err = decode_payload("zz").unwrap_err();
        assert!(err.to_string().starts_with("invalid request: invalid hex payload"));
    }
}
