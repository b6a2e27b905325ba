pub mod auth;
pub mod config;
pub mod directory;
pub mod encryption;
pub mod gateway;

pub use auth::{DecryptingMessageHandler, DeviceAuthenticator, LogOfflineNotifier};
pub use config::Config;
pub use directory::{DeviceDirectory, InMemoryDeviceDirectory};
pub use encryption::{EncryptionWorker, EncryptionWorkerRegistry, RegistryError, WorkerError};
pub use gateway::{
    AuthOutcome, AuthedMessageHandler, AuthenticationResolver, ConnectionGateway, GatewayError,
    GatewayHooks, GatewaySettings, OfflineNotifier, Recipients,
};
