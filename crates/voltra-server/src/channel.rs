use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voltra_core::{PushEvent, RelayError};

/// Unique id for one attached control channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new() -> Self {
        Self(format!("chan_{}", Uuid::now_v7()))
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct AttachedChannel {
    id: ChannelId,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// The zero-or-one control channel currently attached to the relay.
///
/// Attach replaces the previous channel unconditionally and cancels it;
/// detach is a no-op unless the caller is still the current channel, so a
/// superseded connection tearing down late cannot evict its replacement.
pub struct ChannelRegistry {
    current: Mutex<Option<AttachedChannel>>,
    queue_size: usize,
}

impl ChannelRegistry {
    pub fn new(queue_size: usize) -> Self {
        Self {
            current: Mutex::new(None),
            queue_size,
        }
    }

    /// Attach a new channel, superseding any previous one. Returns the
    /// outbound frame queue and the token the superseded path cancels.
    pub fn attach(&self) -> (ChannelId, mpsc::Receiver<String>, CancellationToken) {
        let id = ChannelId::new();
        let (tx, rx) = mpsc::channel(self.queue_size);
        let cancel = CancellationToken::new();
        let previous = self.current.lock().replace(AttachedChannel {
            id: id.clone(),
            tx,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            tracing::info!(channel_id = %previous.id, "Superseding attached channel");
            previous.cancel.cancel();
        }
        (id, rx, cancel)
    }

    /// Detach `id` if it is still the current channel.
    pub fn detach(&self, id: &ChannelId) {
        let mut current = self.current.lock();
        if current.as_ref().map(|channel| &channel.id) == Some(id) {
            *current = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn current(&self) -> Option<ChannelId> {
        self.current.lock().as_ref().map(|channel| channel.id.clone())
    }

    /// Push an event to the attached channel, if any. Never blocks: a full
    /// queue drops the event. The error is for the caller's log line and
    /// must not propagate into a request path.
    pub fn push(&self, event: &PushEvent) -> Result<(), RelayError> {
        let tx = match self.current.lock().as_ref() {
            Some(channel) => channel.tx.clone(),
            None => return Ok(()),
        };
        let frame = serde_json::to_string(event)
            .map_err(|e| RelayError::PushDelivery(e.to_string()))?;
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(RelayError::PushDelivery("outbound queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(RelayError::PushDelivery("channel closed".to_string()))
            }
        }
    }

    /// [`push`](Self::push) with the failure logged and swallowed.
    pub fn push_or_log(&self, event: &PushEvent) {
        if let Err(e) = self.push(event) {
            tracing::warn!(
                event_type = event.event_type(),
                error = %e,
                "Dropped push event"
            );
        }
    }

    /// Queue a response frame for a specific channel, waiting for queue
    /// space. Returns false when `id` has been superseded or its receiver
    /// is gone.
    pub async fn send(&self, id: &ChannelId, frame: String) -> bool {
        let tx = {
            let current = self.current.lock();
            match current.as_ref() {
                Some(channel) if &channel.id == id => channel.tx.clone(),
                _ => return false,
            }
        };
        tx.send(frame).await.is_ok()
    }
}
