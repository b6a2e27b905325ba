//! Default gateway hooks: credential-based authentication, decrypting
//! message handling and disconnect logging.
//!
//! These are the hook implementations the shipped binary wires in. An
//! application embedding the gateway can swap any of them out; the gateway
//! itself only sees the trait objects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use devgate_common::{AuthRequest, Device};

use crate::directory::DeviceDirectory;
use crate::encryption::EncryptionWorkerRegistry;
use crate::gateway::{
    AuthOutcome, AuthedMessageHandler, AuthenticationResolver, HookError, OfflineNotifier,
};

/// Resolves handshakes against the device directory and the encryption
/// worker registry.
pub struct DeviceAuthenticator {
    directory: Arc<dyn DeviceDirectory>,
    workers: Arc<EncryptionWorkerRegistry>,
}

impl DeviceAuthenticator {
    pub fn new(directory: Arc<dyn DeviceDirectory>, workers: Arc<EncryptionWorkerRegistry>) -> Self {
        Self { directory, workers }
    }
}

#[async_trait]
impl AuthenticationResolver for DeviceAuthenticator {
    async fn resolve(&self, handshake: Value) -> Result<AuthOutcome, HookError> {
        let request: AuthRequest = serde_json::from_value(handshake)?;

        let Some(device) = self.directory.find_by_uuid(&request.device_uuid).await? else {
            return Ok(AuthOutcome::Denied {
                reason: format!("unknown device '{}'", request.device_uuid),
            });
        };

        // A device record pointing at a missing worker is data corruption,
        // not a credential problem; surface it as an error.
        let worker = self.workers.get(&device.encryption_worker_id)?;

        if worker.validate_credentials(&device.encryption_credentials, &request.auth_payload)? {
            Ok(AuthOutcome::Granted { device })
        } else {
            Ok(AuthOutcome::Denied {
                reason: "encryption worker denied auth".to_string(),
            })
        }
    }
}

/// Decrypts inbound payloads with the device's assigned worker and logs them.
///
/// Stands in for application message processing; a real deployment would
/// forward the plaintext to its own pipeline from here.
pub struct DecryptingMessageHandler {
    workers: Arc<EncryptionWorkerRegistry>,
}

impl DecryptingMessageHandler {
    pub fn new(workers: Arc<EncryptionWorkerRegistry>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl AuthedMessageHandler for DecryptingMessageHandler {
    async fn on_message(&self, raw: &[u8], device: &Device) -> Result<(), HookError> {
        let worker = self.workers.get(&device.encryption_worker_id)?;
        let plaintext = worker.decrypt(&device.encryption_credentials, raw)?;
        tracing::info!(
            "Message from device {}: {} encrypted bytes, {} plaintext bytes",
            device.uuid,
            raw.len(),
            plaintext.len()
        );
        Ok(())
    }
}

/// Logs disconnects of authenticated devices.
#[derive(Debug, Default)]
pub struct LogOfflineNotifier;

#[async_trait]
impl OfflineNotifier for LogOfflineNotifier {
    async fn device_offline(&self, device: &Device) {
        tracing::info!("Device {} went offline", device.uuid);
    }
}
