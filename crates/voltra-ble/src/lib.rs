pub mod mock;
pub mod profile;

pub use mock::{MockDevice, MockTransport};
pub use profile::DeviceProfile;
