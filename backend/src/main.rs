use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devgate_backend::auth::{DecryptingMessageHandler, DeviceAuthenticator, LogOfflineNotifier};
use devgate_backend::config::Config;
use devgate_backend::directory::InMemoryDeviceDirectory;
use devgate_backend::encryption::{workers, EncryptionWorkerRegistry};
use devgate_backend::gateway::{ConnectionGateway, GatewayHooks, GatewaySettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Devgate Connection Gateway");

    // Freeze the encryption worker set; any integrity problem aborts startup.
    let registry = Arc::new(EncryptionWorkerRegistry::new(workers::all())?);
    tracing::info!("Registered encryption workers: {:?}", registry.worker_ids());

    // Device records come from the management plane; the shipped binary
    // reads a JSON seed file.
    let directory = Arc::new(InMemoryDeviceDirectory::load(&config.devices_path)?);
    tracing::info!(
        "Loaded {} device records from {}",
        directory.len(),
        config.devices_path
    );

    let hooks = GatewayHooks {
        resolver: Arc::new(DeviceAuthenticator::new(directory, registry.clone())),
        messages: Arc::new(DecryptingMessageHandler::new(registry)),
        offline: Arc::new(LogOfflineNotifier),
    };

    let settings = GatewaySettings {
        handshake_timeout: config.handshake_timeout(),
        sweep_interval: config.sweep_interval(),
    };
    let gateway = ConnectionGateway::new(settings, hooks);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    gateway.serve(listener).await?;

    Ok(())
}
