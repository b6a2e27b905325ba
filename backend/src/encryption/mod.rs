//! Pluggable per-device cryptography.
//!
//! Every device record names the encryption worker responsible for its
//! traffic. Workers are instantiated once at startup, frozen into the
//! [`EncryptionWorkerRegistry`] and looked up by identifier on every
//! authentication and message event. The gateway core never performs any
//! cryptography itself; it only routes lookups here.

mod registry;
pub mod workers;

pub use registry::{EncryptionWorkerRegistry, RegistryError};

use serde_json::Value;
use thiserror::Error;

/// Errors raised by an individual worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),
    #[error("cipher operation failed: {0}")]
    Cipher(String),
}

/// A pluggable cryptographic strategy.
///
/// Implementations are immutable once constructed and live for the process
/// lifetime behind an `Arc` in the registry.
pub trait EncryptionWorker: Send + Sync {
    /// Stable identifier stored on device records by the management plane.
    fn uuid(&self) -> &str;

    /// Check a handshake proof against a device's stored credentials.
    ///
    /// `Ok(false)` is an authentication denial; `Err` means the stored
    /// credentials or the proof could not even be interpreted.
    fn validate_credentials(&self, credentials: &Value, proof: &Value)
        -> Result<bool, WorkerError>;

    /// Encrypt a payload for the device owning `credentials`.
    fn encrypt(&self, credentials: &Value, plaintext: &[u8]) -> Result<Vec<u8>, WorkerError>;

    /// Decrypt a payload received from the device owning `credentials`.
    fn decrypt(&self, credentials: &Value, ciphertext: &[u8]) -> Result<Vec<u8>, WorkerError>;
}
