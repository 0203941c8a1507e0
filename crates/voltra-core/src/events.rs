use serde::{Deserialize, Serialize};

use crate::device::DeviceRecord;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Unsolicited frames pushed to the attached control channel. These are not
/// replies: they carry a `type` tag instead of a correlation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A device session was established.
    Connected { device: DeviceRecord },

    /// The device session ended. `unexpected` is set only when the
    /// transport dropped the link; client-requested teardown leaves it off.
    Disconnected {
        device: Option<DeviceRecord>,
        #[serde(default, skip_serializing_if = "is_false")]
        unexpected: bool,
    },

    /// Characteristic notification from the device, payload hex-encoded.
    Notification { data: String },

    /// Session snapshot, delivered once when a channel attaches.
    Status {
        connected: bool,
        device: Option<DeviceRecord>,
    },

    /// A request failed and carried no id to reply to.
    Error { error: String },
}

impl PushEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Notification { .. } => "notification",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }
}
