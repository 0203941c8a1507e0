//! Device session — owns the single device connection, runs scan and
//! connect flows against the transport, and forwards link events to the
//! attached control channel. The session outlives any one client: a
//! reconnecting client finds the device exactly as it left it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use voltra_ble::profile::DeviceProfile;
use voltra_core::transport::{Characteristic, DeviceLink, DeviceTransport, LinkEvents};
use voltra_core::{DeviceId, DeviceRecord, LinkEvent, PushEvent, RelayError, SessionStatus};

use crate::channel::ChannelRegistry;

/// An established link plus everything resolved while connecting.
struct ActiveLink {
    link: Box<dyn DeviceLink>,
    device: DeviceRecord,
    write_characteristic: Uuid,
    generation: u64,
}

/// The one slot an active link lives in. Shared with the reader task so a
/// lost link can be cleared without going through the session.
#[derive(Default)]
struct LinkSlot {
    active: Mutex<Option<Arc<ActiveLink>>>,
}

impl LinkSlot {
    fn get(&self) -> Option<Arc<ActiveLink>> {
        self.active.lock().clone()
    }

    fn set(&self, link: Arc<ActiveLink>) {
        *self.active.lock() = Some(link);
    }

    fn take(&self) -> Option<Arc<ActiveLink>> {
        self.active.lock().take()
    }

    /// Clear the slot only if it still holds `generation`. Returns the
    /// device that was connected, or None when the slot moved on already.
    fn clear_if_generation(&self, generation: u64) -> Option<DeviceRecord> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.generation == generation => {}
            _ => return None,
        }
        active.take().map(|link| link.device.clone())
    }
}

pub struct Session {
    transport: Arc<dyn DeviceTransport>,
    profile: DeviceProfile,
    registry: Arc<ChannelRegistry>,
    slot: Arc<LinkSlot>,
    generation: AtomicU64,
    // Serializes connect/disconnect end to end. Scans and writes stay out
    // of it; the transport handles its own interleaving there.
    op_guard: AsyncMutex<()>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        profile: DeviceProfile,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            transport,
            profile,
            registry,
            slot: Arc::new(LinkSlot::default()),
            generation: AtomicU64::new(0),
            op_guard: AsyncMutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.slot
            .get()
            .is_some_and(|active| active.link.is_connected())
    }

    /// Snapshot of the session. The device stays reported while the link
    /// is dropping, so `connected: false` with a device means the loss has
    /// not been processed yet.
    pub fn status(&self) -> SessionStatus {
        match self.slot.get() {
            Some(active) => SessionStatus {
                connected: active.link.is_connected(),
                device: Some(active.device.clone()),
            },
            None => SessionStatus::idle(),
        }
    }

    /// Scan for peripherals of the configured family. Devices advertising
    /// no name never match the prefix and are dropped.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, RelayError> {
        tracing::info!(timeout_secs = timeout.as_secs_f64(), "Scanning for devices");
        let discovered = self
            .transport
            .discover(timeout)
            .await
            .map_err(|e| RelayError::Discovery(e.to_string()))?;

        let devices: Vec<DeviceRecord> = discovered
            .into_iter()
            .filter(|found| {
                found
                    .name
                    .as_deref()
                    .is_some_and(|name| self.profile.matches_name(name))
            })
            .map(|found| DeviceRecord::new(found.id, found.name).with_rssi(found.rssi))
            .collect();

        tracing::info!(found = devices.len(), "Scan complete");
        Ok(devices)
    }

    /// Connect to a device and establish the session: link up, resolve the
    /// profile characteristics, subscribe to both, then commit and announce.
    /// An existing session is torn down first, with its disconnected push.
    pub async fn connect(
        &self,
        device_id: DeviceId,
        device_name: Option<String>,
    ) -> Result<DeviceRecord, RelayError> {
        let _op = self.op_guard.lock().await;

        if self.slot.get().is_some() {
            tracing::info!(device_id = %device_id, "Replacing existing device session");
            self.teardown_active().await;
        }

        let (link, events) = self
            .transport
            .connect(&device_id)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        if !link.is_connected() {
            return Err(RelayError::failed_to_connect());
        }

        let (write_characteristic, notify_characteristic) =
            match self.resolve_characteristics(link.characteristics()) {
                Some(pair) => pair,
                None => {
                    self.teardown_link(&*link).await;
                    return Err(RelayError::ProtocolMismatch);
                }
            };

        // The device acks commands on the write characteristic, so it gets
        // subscribed alongside the notify characteristic.
        for characteristic in [notify_characteristic, write_characteristic] {
            if let Err(e) = link.subscribe(characteristic).await {
                self.teardown_link(&*link).await;
                return Err(RelayError::Connection(e.to_string()));
            }
        }

        let device = DeviceRecord::new(device_id, device_name);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.slot.set(Arc::new(ActiveLink {
            link,
            device: device.clone(),
            write_characteristic,
            generation,
        }));
        self.spawn_reader(events, generation);

        tracing::info!(device_id = %device.id, device_name = %device.name, "Device session established");
        self.registry.push_or_log(&PushEvent::Connected {
            device: device.clone(),
        });

        Ok(device)
    }

    /// Tear down the session. Idempotent: with no active link this still
    /// pushes a disconnected event, so clients can treat it as a sync.
    pub async fn disconnect(&self) -> Option<DeviceRecord> {
        let _op = self.op_guard.lock().await;
        self.teardown_active().await
    }

    /// Acked write of `payload` to the device's write characteristic.
    pub async fn write(&self, payload: &[u8]) -> Result<(), RelayError> {
        let active = self.slot.get().ok_or(RelayError::NotConnected)?;
        if !active.link.is_connected() {
            return Err(RelayError::NotConnected);
        }
        active
            .link
            .write_with_ack(active.write_characteristic, payload)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))
    }

    /// Disconnect an active device session before process exit.
    pub async fn shutdown(&self) {
        if self.is_connected() {
            tracing::info!("Disconnecting device session for shutdown");
            self.disconnect().await;
        }
    }

    /// Pick the profile's write and notify characteristics out of what the
    /// peripheral exposes. Matching is by UUID value, service-qualified.
    fn resolve_characteristics(
        &self,
        characteristics: Vec<Characteristic>,
    ) -> Option<(Uuid, Uuid)> {
        let mut write = None;
        let mut notify = None;
        for characteristic in characteristics {
            if characteristic.service != self.profile.service {
                continue;
            }
            if characteristic.id == self.profile.write_characteristic {
                write = Some(characteristic.id);
            }
            if characteristic.id == self.profile.notify_characteristic {
                notify = Some(characteristic.id);
            }
        }
        Some((write?, notify?))
    }

    /// Take down the active link, if any, and push the disconnected event.
    /// Teardown failures are logged, never surfaced.
    async fn teardown_active(&self) -> Option<DeviceRecord> {
        let taken = self.slot.take();
        let device = taken.as_ref().map(|active| active.device.clone());
        if let Some(active) = taken {
            self.teardown_link(&*active.link).await;
        }
        match &device {
            Some(device) => {
                tracing::info!(device_id = %device.id, "Device session closed")
            }
            None => tracing::debug!("Disconnect with no active session"),
        }
        self.registry.push_or_log(&PushEvent::Disconnected {
            device: device.clone(),
            unexpected: false,
        });
        device
    }

    async fn teardown_link(&self, link: &dyn DeviceLink) {
        if let Err(e) = link.disconnect().await {
            tracing::warn!(error = %e, "Transport teardown failed");
        }
    }

    /// Forward link events to the attached channel until the stream ends.
    /// An end without an explicit disconnect means the transport dropped
    /// the link; stale generations are ignored so a replaced link's reader
    /// cannot clobber its successor.
    fn spawn_reader(&self, mut events: LinkEvents, generation: u64) {
        let slot = Arc::clone(&self.slot);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    LinkEvent::Notification { data, .. } => {
                        registry.push_or_log(&PushEvent::Notification {
                            data: hex::encode(&data),
                        });
                    }
                    LinkEvent::Disconnected => break,
                }
            }
            if let Some(device) = slot.clear_if_generation(generation) {
                tracing::warn!(device_id = %device.id, "Device link lost");
                registry.push_or_log(&PushEvent::Disconnected {
                    device: Some(device),
                    unexpected: true,
                });
            }
        });
    }
}
