//! Device record consumed from the management plane.
//!
//! The gateway only ever reads these: they are resolved during the handshake
//! and handed to routing predicates and encryption callbacks. Creating,
//! updating and persisting device records is the management plane's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote device known to the management plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier.
    pub uuid: String,
    /// Short display name.
    pub shortname: String,
    /// Optional alias for the short name.
    #[serde(default)]
    pub shortname_alias: Option<String>,
    /// Full display name.
    pub fullname: String,
    /// Optional alias for the full name.
    #[serde(default)]
    pub fullname_alias: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Identifier of the encryption worker assigned to this device.
    pub encryption_worker_id: String,
    /// Opaque credential payload for the assigned worker (keys, certs, ...).
    /// The gateway never looks inside; only the worker does.
    pub encryption_credentials: serde_json::Value,
    /// When the device was last seen by the management plane.
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Build a minimal record with empty display metadata.
    pub fn new(
        uuid: impl Into<String>,
        encryption_worker_id: impl Into<String>,
        encryption_credentials: serde_json::Value,
    ) -> Self {
        let uuid = uuid.into();
        Self {
            shortname: uuid.clone(),
            shortname_alias: None,
            fullname: uuid.clone(),
            fullname_alias: None,
            description: String::new(),
            encryption_worker_id: encryption_worker_id.into(),
            encryption_credentials,
            last_active_at: None,
            uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_deserialize_minimal() {
        let json = r#"{
            "uuid": "dev-1",
            "shortname": "d1",
            "fullname": "Device One",
            "encryption_worker_id": "plain-token-v1",
            "encryption_credentials": {"token": "s3cret"}
        }"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.uuid, "dev-1");
        assert_eq!(device.encryption_worker_id, "plain-token-v1");
        assert!(device.shortname_alias.is_none());
        assert!(device.last_active_at.is_none());
    }

    #[test]
    fn test_device_roundtrip() {
        let device = Device::new("dev-2", "plain-token-v1", json!({"token": "t"}));
        let json = serde_json::to_string(&device).unwrap();
        let parsed: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, device);
    }

    #[test]
    fn test_device_new_defaults_display_fields() {
        let device = Device::new("dev-3", "noop", json!({}));
        assert_eq!(device.shortname, "dev-3");
        assert_eq!(device.fullname, "dev-3");
        assert!(device.description.is_empty());
    }
}
