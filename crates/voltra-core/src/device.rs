use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport-level address of a peripheral. Opaque to the relay; the
/// backend decides what it looks like (MAC address, CoreBluetooth UUID).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A peripheral as reported to clients, in scan results and push events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl DeviceRecord {
    /// A record with the advertised name, falling back to the raw id when
    /// the name is missing or empty.
    pub fn new(id: DeviceId, name: Option<String>) -> Self {
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.as_str().to_string());
        Self {
            id,
            name,
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }
}

/// Snapshot of the device session, reported on the status action, the
/// status endpoint, and the initial push to a freshly attached channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub device: Option<DeviceRecord>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            connected: false,
            device: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_round_trips() {
        let id = DeviceId::from_raw("AA:BB:CC:DD:EE:FF");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");

        let parsed: DeviceId = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn device_id_serializes_as_plain_string() {
        let id = DeviceId::from_raw("dev-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dev-1\"");

        let back: DeviceId = serde_json::from_str("\"dev-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn record_name_falls_back_to_id() {
        let record = DeviceRecord::new(DeviceId::from_raw("dev-2"), None);
        assert_eq!(record.name, "dev-2");

        let blank = DeviceRecord::new(DeviceId::from_raw("dev-2"), Some(String::new()));
        assert_eq!(blank.name, "dev-2");

        let named = DeviceRecord::new(DeviceId::from_raw("dev-2"), Some("VTR-Left".to_string()));
        assert_eq!(named.name, "VTR-Left");
    }

    #[test]
    fn record_omits_missing_rssi() {
        let record = DeviceRecord::new(DeviceId::from_raw("dev-3"), Some("VTR-A".to_string()));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("rssi"));

        let with_rssi = record.with_rssi(Some(-58));
        let json = serde_json::to_string(&with_rssi).unwrap();
        assert!(json.contains("\"rssi\":-58"));
    }

    #[test]
    fn status_serializes_null_device_when_idle() {
        let json = serde_json::to_string(&SessionStatus::idle()).unwrap();
        assert_eq!(json, "{\"connected\":false,\"device\":null}");
    }
}
