//! Scriptable transport for tests and for running the relay without a
//! radio. Devices, failures, and link events are all injected by hand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use voltra_core::transport::{Characteristic, DeviceLink, DeviceTransport, Discovered, LinkEvent, LinkEvents};
use voltra_core::{DeviceId, TransportError};

use crate::profile::{VOLTRA_NOTIFY, VOLTRA_SERVICE, VOLTRA_WRITE};

const EVENT_QUEUE: usize = 32;

/// A peripheral the mock transport will report and accept connections to.
#[derive(Clone, Debug)]
pub struct MockDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub characteristics: Vec<Characteristic>,
}

impl MockDevice {
    /// A device carrying the full Voltra profile.
    pub fn voltra(id: &str, name: &str) -> Self {
        Self {
            id: DeviceId::from_raw(id),
            name: Some(name.to_string()),
            rssi: Some(-60),
            characteristics: vec![
                Characteristic {
                    service: VOLTRA_SERVICE,
                    id: VOLTRA_WRITE,
                },
                Characteristic {
                    service: VOLTRA_SERVICE,
                    id: VOLTRA_NOTIFY,
                },
            ],
        }
    }

    /// A device that connects fine but exposes no characteristics.
    pub fn bare(id: &str, name: &str) -> Self {
        Self {
            id: DeviceId::from_raw(id),
            name: Some(name.to_string()),
            rssi: Some(-70),
            characteristics: Vec::new(),
        }
    }

    /// A device advertising no name at all.
    pub fn unnamed(id: &str) -> Self {
        Self {
            id: DeviceId::from_raw(id),
            name: None,
            rssi: Some(-80),
            characteristics: Vec::new(),
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

struct LinkState {
    characteristics: Vec<Characteristic>,
    connected: AtomicBool,
    echo: bool,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscriptions: Mutex<Vec<Uuid>>,
    subscribe_error: Arc<Mutex<Option<String>>>,
    write_error: Arc<Mutex<Option<String>>>,
    events: Mutex<Option<mpsc::Sender<LinkEvent>>>,
}

/// In-memory [`DeviceTransport`]. Scripted failures are one-shot: the next
/// matching call consumes them and later calls succeed again.
pub struct MockTransport {
    devices: Mutex<Vec<MockDevice>>,
    discovery_error: Mutex<Option<String>>,
    connect_error: Mutex<Option<String>>,
    dead_on_arrival: AtomicBool,
    subscribe_error: Arc<Mutex<Option<String>>>,
    write_error: Arc<Mutex<Option<String>>>,
    echo: AtomicBool,
    discover_calls: AtomicUsize,
    last_timeout: Mutex<Option<Duration>>,
    active: Mutex<Option<Arc<LinkState>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            discovery_error: Mutex::new(None),
            connect_error: Mutex::new(None),
            dead_on_arrival: AtomicBool::new(false),
            subscribe_error: Arc::new(Mutex::new(None)),
            write_error: Arc::new(Mutex::new(None)),
            echo: AtomicBool::new(false),
            discover_calls: AtomicUsize::new(0),
            last_timeout: Mutex::new(None),
            active: Mutex::new(None),
        }
    }

    pub fn with_devices(devices: Vec<MockDevice>) -> Self {
        let transport = Self::new();
        *transport.devices.lock() = devices;
        transport
    }

    pub fn add_device(&self, device: MockDevice) {
        self.devices.lock().push(device);
    }

    /// Fail the next `discover` call.
    pub fn fail_discovery(&self, message: &str) {
        *self.discovery_error.lock() = Some(message.to_string());
    }

    /// Fail the next `connect` call.
    pub fn fail_connect(&self, message: &str) {
        *self.connect_error.lock() = Some(message.to_string());
    }

    /// Hand out the next link already dead: `connect` still returns it,
    /// but `is_connected` reports false from the first call.
    pub fn kill_next_link(&self) {
        self.dead_on_arrival.store(true, Ordering::Relaxed);
    }

    /// Fail the next `subscribe` call, including on an already-open link.
    pub fn fail_subscribe(&self, message: &str) {
        *self.subscribe_error.lock() = Some(message.to_string());
    }

    /// Fail the next `write_with_ack` call, including on an already-open link.
    pub fn fail_write(&self, message: &str) {
        *self.write_error.lock() = Some(message.to_string());
    }

    /// When on, every acked write is reflected back as a notification on
    /// the notify characteristic. Applies to links opened afterwards.
    pub fn set_echo(&self, on: bool) {
        self.echo.store(on, Ordering::Relaxed);
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::Relaxed)
    }

    pub fn last_discover_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock()
    }

    fn active_link(&self) -> Option<Arc<LinkState>> {
        self.active.lock().clone()
    }

    /// Inject a notification on the most recently opened link. Returns
    /// false when there is no live link to deliver on.
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) -> bool {
        let Some(link) = self.active_link() else {
            return false;
        };
        let sender = link.events.lock().clone();
        match sender {
            Some(tx) => tx
                .try_send(LinkEvent::Notification {
                    characteristic,
                    data: data.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Drop the most recently opened link from the transport side, as a
    /// device going out of range would. Emits `Disconnected` and ends the
    /// event stream.
    pub fn drop_link(&self) -> bool {
        let Some(link) = self.active_link() else {
            return false;
        };
        link.connected.store(false, Ordering::Relaxed);
        let sender = link.events.lock().take();
        match sender {
            Some(tx) => {
                let _ = tx.try_send(LinkEvent::Disconnected);
                true
            }
            None => false,
        }
    }

    /// Payloads written to the most recently opened link, in order.
    pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.active_link()
            .map(|link| link.writes.lock().clone())
            .unwrap_or_default()
    }

    /// Characteristics subscribed on the most recently opened link.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.active_link()
            .map(|link| link.subscriptions.lock().clone())
            .unwrap_or_default()
    }

    /// Whether the most recently opened link is still up.
    pub fn link_connected(&self) -> bool {
        self.active_link()
            .map(|link| link.connected.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<Discovered>, TransportError> {
        self.discover_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_timeout.lock() = Some(timeout);
        if let Some(message) = self.discovery_error.lock().take() {
            return Err(TransportError::Discovery(message));
        }
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|device| Discovered {
                id: device.id.clone(),
                name: device.name.clone(),
                rssi: device.rssi,
            })
            .collect())
    }

    async fn connect(
        &self,
        id: &DeviceId,
    ) -> Result<(Box<dyn DeviceLink>, LinkEvents), TransportError> {
        if let Some(message) = self.connect_error.lock().take() {
            return Err(TransportError::Connect(message));
        }
        let device = self
            .devices
            .lock()
            .iter()
            .find(|device| &device.id == id)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("no such device: {id}")))?;

        let alive = !self.dead_on_arrival.swap(false, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let state = Arc::new(LinkState {
            characteristics: device.characteristics,
            connected: AtomicBool::new(alive),
            echo: self.echo.load(Ordering::Relaxed),
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            subscribe_error: Arc::clone(&self.subscribe_error),
            write_error: Arc::clone(&self.write_error),
            events: Mutex::new(Some(tx)),
        });
        *self.active.lock() = Some(Arc::clone(&state));

        let events: LinkEvents = Box::pin(ReceiverStream::new(rx));
        Ok((Box::new(MockLink { state }), events))
    }
}

struct MockLink {
    state: Arc<LinkState>,
}

#[async_trait]
impl DeviceLink for MockLink {
    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    fn characteristics(&self) -> Vec<Characteristic> {
        self.state.characteristics.clone()
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        if let Some(message) = self.state.subscribe_error.lock().take() {
            return Err(TransportError::Subscribe(message));
        }
        self.state.subscriptions.lock().push(characteristic);
        Ok(())
    }

    async fn write_with_ack(
        &self,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::LinkClosed);
        }
        if let Some(message) = self.state.write_error.lock().take() {
            return Err(TransportError::Write(message));
        }
        self.state
            .writes
            .lock()
            .push((characteristic, payload.to_vec()));
        if self.state.echo {
            let sender = self.state.events.lock().clone();
            if let Some(tx) = sender {
                let _ = tx.try_send(LinkEvent::Notification {
                    characteristic: VOLTRA_NOTIFY,
                    data: payload.to_vec(),
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.connected.store(false, Ordering::Relaxed);
        // Dropping the sender ends the stream without a Disconnected event,
        // which is how readers tell teardown apart from a lost link.
        self.state.events.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn voltra_transport() -> MockTransport {
        MockTransport::with_devices(vec![MockDevice::voltra("dev-1", "VTR-A")])
    }

    #[tokio::test]
    async fn discover_reports_devices_and_timeout() {
        let transport = MockTransport::with_devices(vec![
            MockDevice::voltra("dev-1", "VTR-A"),
            MockDevice::unnamed("dev-2"),
        ]);

        let found = transport.discover(Duration::from_secs_f64(2.5)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name.as_deref(), Some("VTR-A"));
        assert_eq!(found[1].name, None);
        assert_eq!(transport.discover_calls(), 1);
        assert_eq!(
            transport.last_discover_timeout(),
            Some(Duration::from_secs_f64(2.5))
        );
    }

    #[tokio::test]
    async fn discovery_failure_is_one_shot() {
        let transport = voltra_transport();
        transport.fail_discovery("adapter off");

        let err = transport.discover(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Discovery("adapter off".to_string()));

        assert!(transport.discover(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn connect_unknown_device_fails() {
        let transport = voltra_transport();
        let err = transport
            .connect(&DeviceId::from_raw("missing"))
            .await
            .err()
            .unwrap();
        assert_eq!(err, TransportError::Connect("no such device: missing".to_string()));
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let transport = voltra_transport();
        let (link, _events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        link.subscribe(VOLTRA_NOTIFY).await.unwrap();
        link.write_with_ack(VOLTRA_WRITE, &[0x0a, 0x0b]).await.unwrap();

        assert_eq!(transport.subscriptions(), vec![VOLTRA_NOTIFY]);
        assert_eq!(transport.written(), vec![(VOLTRA_WRITE, vec![0x0a, 0x0b])]);
    }

    #[tokio::test]
    async fn scripted_write_failure_hits_open_link() {
        let transport = voltra_transport();
        let (link, _events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        transport.fail_write("device busy");
        let err = link.write_with_ack(VOLTRA_WRITE, &[0x01]).await.unwrap_err();
        assert_eq!(err, TransportError::Write("device busy".to_string()));

        link.write_with_ack(VOLTRA_WRITE, &[0x02]).await.unwrap();
        assert_eq!(transport.written(), vec![(VOLTRA_WRITE, vec![0x02])]);
    }

    #[tokio::test]
    async fn notify_delivers_on_active_link() {
        let transport = voltra_transport();
        let (_link, mut events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        assert!(transport.notify(VOLTRA_NOTIFY, &[1, 2, 3]));
        assert_eq!(
            events.next().await,
            Some(LinkEvent::Notification {
                characteristic: VOLTRA_NOTIFY,
                data: vec![1, 2, 3],
            })
        );
    }

    #[tokio::test]
    async fn drop_link_emits_disconnected_then_ends() {
        let transport = voltra_transport();
        let (link, mut events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        assert!(transport.drop_link());
        assert!(!link.is_connected());
        assert_eq!(events.next().await, Some(LinkEvent::Disconnected));
        assert_eq!(events.next().await, None);

        // Nothing left to notify.
        assert!(!transport.notify(VOLTRA_NOTIFY, &[1]));
    }

    #[tokio::test]
    async fn explicit_disconnect_ends_stream_silently() {
        let transport = voltra_transport();
        let (link, mut events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        link.disconnect().await.unwrap();
        assert!(!link.is_connected());
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn echo_answers_writes_on_the_notify_characteristic() {
        let transport = voltra_transport();
        transport.set_echo(true);
        let (link, mut events) = transport.connect(&DeviceId::from_raw("dev-1")).await.unwrap();

        link.write_with_ack(VOLTRA_WRITE, &[0xde, 0xad]).await.unwrap();
        assert_eq!(
            events.next().await,
            Some(LinkEvent::Notification {
                characteristic: VOLTRA_NOTIFY,
                data: vec![0xde, 0xad],
            })
        );
    }
}
