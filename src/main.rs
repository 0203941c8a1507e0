use std::sync::Arc;

use clap::Parser;

use voltra_ble::mock::{MockDevice, MockTransport};
use voltra_ble::profile::DeviceProfile;
use voltra_server::channel::ChannelRegistry;
use voltra_server::server::{self, ServerConfig};
use voltra_server::session::Session;

/// Development relay for Voltra peripherals: one WebSocket control client,
/// one device session. Runs against a simulated peripheral that echoes
/// acked writes back as notifications.
#[derive(Parser, Debug)]
#[command(name = "voltra-relay", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Advertised name of the simulated peripheral.
    #[arg(long, default_value = "VTR-Sim")]
    device_name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Starting Voltra relay");

    let transport = Arc::new(MockTransport::new());
    transport.set_echo(true);
    transport.add_device(MockDevice::voltra("sim-0", &args.device_name));
    tracing::info!(device_name = %args.device_name, "Simulated peripheral ready");

    let config = ServerConfig {
        port: args.port,
        bind: args.bind,
        ..Default::default()
    };
    let registry = Arc::new(ChannelRegistry::new(config.push_queue_size));
    let session = Arc::new(Session::new(
        transport,
        DeviceProfile::default(),
        registry,
    ));

    let handle = server::start(config, Arc::clone(&session))
        .await
        .expect("Failed to start server");
    tracing::info!(port = handle.port, "Voltra relay ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    session.shutdown().await;
    tracing::info!("Shutting down");
}
