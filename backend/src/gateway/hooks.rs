//! Callback contracts the owning application supplies to the gateway.
//!
//! The gateway itself is encryption- and persistence-agnostic: deciding who
//! a handshake belongs to, what to do with an authenticated message, and who
//! cares that a device went offline are all application concerns, modeled as
//! named single-method traits so they can be swapped and mocked.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use devgate_common::Device;

/// Error type for hook failures, matching the boxed-error plumbing used
/// throughout the message path.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of resolving a handshake.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The handshake identified a known device with valid credentials.
    Granted { device: Device },
    /// The handshake was well-formed but the credentials were rejected.
    Denied { reason: String },
}

/// Resolves the single handshake message of a new connection.
///
/// Expected to consult the device directory and the encryption worker
/// registry. Returning `Err` (for example when a device record references a
/// worker that no longer exists) is treated like a denial at the wire level:
/// the peer gets an error envelope and the connection is closed.
#[async_trait]
pub trait AuthenticationResolver: Send + Sync {
    async fn resolve(&self, handshake: Value) -> Result<AuthOutcome, HookError>;
}

/// Receives every inbound message from an authenticated connection, in
/// receipt order. A failure is reported back to that one peer as an error
/// envelope; the connection stays open.
#[async_trait]
pub trait AuthedMessageHandler: Send + Sync {
    async fn on_message(&self, raw: &[u8], device: &Device) -> Result<(), HookError>;
}

/// Notified exactly once when an authenticated connection closes, whether
/// the peer hung up or the liveness sweep terminated it.
#[async_trait]
pub trait OfflineNotifier: Send + Sync {
    async fn device_offline(&self, device: &Device);
}

/// The full callback set a gateway is constructed with.
#[derive(Clone)]
pub struct GatewayHooks {
    pub resolver: Arc<dyn AuthenticationResolver>,
    pub messages: Arc<dyn AuthedMessageHandler>,
    pub offline: Arc<dyn OfflineNotifier>,
}
