//! Capability interface over the radio backend. The relay session talks to
//! these traits only; backends (and the test transport) live elsewhere.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::device::DeviceId;
use crate::error::TransportError;

/// Event emitted by an established link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// Value notification on a subscribed characteristic.
    Notification { characteristic: Uuid, data: Vec<u8> },

    /// The transport dropped the link. An explicit `disconnect()` ends the
    /// event stream without this event.
    Disconnected,
}

/// Events for one link's lifetime. Consumed by exactly one reader; the
/// stream ends when the link goes away.
pub type LinkEvents = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// A characteristic as exposed by a connected peripheral, qualified by the
/// service it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub service: Uuid,
    pub id: Uuid,
}

/// One discovery result. Names and signal strength are advertisement data
/// and may be absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Discovered {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Discovery and connection establishment.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Scan for peripherals for `timeout`. The backend dedups; order is
    /// discovery order.
    async fn discover(&self, timeout: Duration) -> Result<Vec<Discovered>, TransportError>;

    /// Establish a link. The returned stream carries every event for the
    /// link's lifetime.
    async fn connect(
        &self,
        id: &DeviceId,
    ) -> Result<(Box<dyn DeviceLink>, LinkEvents), TransportError>;
}

/// An established link to a peripheral.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Current link state as the transport sees it.
    fn is_connected(&self) -> bool;

    /// Every characteristic the peripheral exposes, across all services.
    fn characteristics(&self) -> Vec<Characteristic>;

    /// Subscribe to value notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Acknowledged write to a characteristic.
    async fn write_with_ack(
        &self,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Tear the link down. Idempotent at the transport level.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
