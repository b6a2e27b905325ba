//! Read access to device records.
//!
//! Persistence of device records belongs to the management plane; the
//! gateway only needs a lookup by identity during authentication. The trait
//! keeps that boundary explicit, and the in-memory implementation (seeded
//! from a JSON file) is what the shipped binary runs with.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use devgate_common::Device;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read device seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse device seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only device lookup, keyed by identity.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Device>, DirectoryError>;
}

/// Directory backed by a fixed in-memory set of devices.
#[derive(Debug, Default)]
pub struct InMemoryDeviceDirectory {
    devices: HashMap<String, Device>,
}

impl InMemoryDeviceDirectory {
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| (device.uuid.clone(), device))
                .collect(),
        }
    }

    /// Load a JSON array of device records from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let text = std::fs::read_to_string(path)?;
        let devices: Vec<Device> = serde_json::from_str(&text)?;
        Ok(Self::from_devices(devices))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Device>, DirectoryError> {
        Ok(self.devices.get(uuid).cloned())
    }
}
