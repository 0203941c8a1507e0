pub mod channel;
pub mod dispatch;
pub mod rpc;
pub mod server;
pub mod session;

pub use channel::{ChannelId, ChannelRegistry};
pub use server::{start, AppState, ServerConfig, ServerHandle};
pub use session::Session;
