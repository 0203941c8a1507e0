pub mod device;
pub mod error;
pub mod events;
pub mod transport;

pub use device::{DeviceId, DeviceRecord, SessionStatus};
pub use error::{RelayError, TransportError};
pub use events::PushEvent;
pub use transport::{Characteristic, DeviceLink, DeviceTransport, Discovered, LinkEvent, LinkEvents};
