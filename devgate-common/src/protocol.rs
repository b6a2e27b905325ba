//! Wire protocol for device-gateway communication.
//!
//! The protocol is JSON text over a WebSocket connection.
//!
//! # Connection Flow
//!
//! 1. Device connects to the gateway WebSocket endpoint
//! 2. The first message the device sends is the handshake; the gateway hands
//!    it to the authentication resolver untouched
//! 3. On denial (or a malformed handshake) the gateway writes an
//!    [`ErrorEnvelope`] and closes the connection; the device must reconnect
//!    to retry
//! 4. After that, inbound messages are opaque encrypted payloads and outbound
//!    frames are either serialized documents or pre-encrypted payloads built
//!    by the application
//!
//! Liveness uses protocol-level ping/pong frames, not application messages.
//!
//! # Security
//!
//! Always terminate `wss://` in front of the gateway in production; the
//! per-device payload encryption is in addition to, not instead of, transport
//! encryption.

use serde::{Deserialize, Serialize};

/// Handshake body understood by the default authentication resolver.
///
/// The gateway itself treats the handshake as opaque JSON; this shape is a
/// contract between devices and the application-supplied resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Identity the device claims.
    pub device_uuid: String,
    /// Proof material for the device's assigned encryption worker
    /// (signature, token, challenge response, ...).
    #[serde(default)]
    pub auth_payload: serde_json::Value,
}

/// Error envelope written to a peer: `{"error": "<message>"}`.
///
/// Sent before closing a connection that failed its handshake, and after an
/// authenticated message the handler could not process (the connection stays
/// open in that case).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_request_deserialize() {
        let json = r#"{"device_uuid": "dev-1", "auth_payload": {"token": "abc"}}"#;
        let request: AuthRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.device_uuid, "dev-1");
        assert_eq!(request.auth_payload, json!({"token": "abc"}));
    }

    #[test]
    fn test_auth_request_payload_defaults_to_null() {
        let request: AuthRequest = serde_json::from_str(r#"{"device_uuid": "dev-1"}"#).unwrap();
        assert!(request.auth_payload.is_null());
    }

    #[test]
    fn test_error_envelope_shape() {
        let envelope = ErrorEnvelope::new("authentication denied");
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"error":"authentication denied"}"#);
    }

    #[test]
    fn test_error_envelope_roundtrip() {
        let json = r#"{"error":"boom"}"#;
        let parsed: ErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.error, "boom");
    }
}
