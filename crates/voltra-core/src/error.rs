use thiserror::Error;

/// Errors surfaced by relay operations. Display text is the wire format:
/// whatever a variant renders to is exactly what a client sees in a
/// response `error` field or an error push.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    // Device-facing
    #[error("scan failed: {0}")]
    Discovery(String),

    #[error("{0}")]
    Connection(String),

    #[error("Required characteristics not found")]
    ProtocolMismatch,

    #[error("Not connected")]
    NotConnected,

    // Client-facing
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid request: {0}")]
    MalformedRequest(String),

    // Internal — never surfaced on the wire
    #[error("push delivery failed: {0}")]
    PushDelivery(String),
}

impl RelayError {
    /// Canonical connect failure when the transport gave no better detail.
    pub fn failed_to_connect() -> Self {
        Self::Connection("Failed to connect".to_string())
    }

    /// True for errors that must be swallowed and logged instead of being
    /// sent to a client.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::PushDelivery(_))
    }

    /// Short kind string for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Connection(_) => "connection",
            Self::ProtocolMismatch => "protocol_mismatch",
            Self::NotConnected => "not_connected",
            Self::UnknownAction(_) => "unknown_action",
            Self::MalformedRequest(_) => "malformed_request",
            Self::PushDelivery(_) => "push_delivery",
        }
    }
}

/// Errors raised by a transport backend. Mapped into [`RelayError`] at the
/// session boundary; never serialized directly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error("link closed")]
    LinkClosed,
}
