//! Registry of encryption workers, keyed by worker identifier.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::EncryptionWorker;

/// Errors from registry construction and lookup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A worker reported an empty identifier. Startup must abort: the worker
    /// set is a configuration integrity problem, not a runtime condition.
    #[error("encryption worker with an empty uuid")]
    EmptyWorkerId,
    /// Two workers reported the same identifier. Silently keeping either one
    /// would route devices to the wrong cryptography, so startup aborts.
    #[error("duplicate encryption worker uuid '{0}'")]
    DuplicateWorkerId(String),
    /// Lookup for an identifier no worker was registered under. Indicates a
    /// stale or corrupt device record, not a transient failure.
    #[error("no encryption worker with uuid '{0}'")]
    WorkerNotFound(String),
}

/// Immutable id -> worker map, built once at startup.
pub struct EncryptionWorkerRegistry {
    workers: HashMap<String, Arc<dyn EncryptionWorker>>,
}

impl EncryptionWorkerRegistry {
    /// Build the registry from an explicit registration list.
    ///
    /// Fails fast on an empty or duplicate worker uuid.
    pub fn new(workers: Vec<Arc<dyn EncryptionWorker>>) -> Result<Self, RegistryError> {
        let mut map: HashMap<String, Arc<dyn EncryptionWorker>> = HashMap::new();
        for worker in workers {
            let uuid = worker.uuid();
            if uuid.is_empty() {
                return Err(RegistryError::EmptyWorkerId);
            }
            if map.contains_key(uuid) {
                return Err(RegistryError::DuplicateWorkerId(uuid.to_string()));
            }
            map.insert(uuid.to_string(), worker);
        }
        Ok(Self { workers: map })
    }

    /// Look up a worker by identifier.
    pub fn get(&self, uuid: &str) -> Result<Arc<dyn EncryptionWorker>, RegistryError> {
        self.workers
            .get(uuid)
            .cloned()
            .ok_or_else(|| RegistryError::WorkerNotFound(uuid.to_string()))
    }

    /// Identifiers of all registered workers.
    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::WorkerError;
    use serde_json::Value;

    struct FakeWorker {
        uuid: String,
    }

    impl FakeWorker {
        fn new(uuid: &str) -> Arc<dyn EncryptionWorker> {
            Arc::new(Self {
                uuid: uuid.to_string(),
            })
        }
    }

    impl EncryptionWorker for FakeWorker {
        fn uuid(&self) -> &str {
            &self.uuid
        }

        fn validate_credentials(&self, _: &Value, _: &Value) -> Result<bool, WorkerError> {
            Ok(true)
        }

        fn encrypt(&self, _: &Value, plaintext: &[u8]) -> Result<Vec<u8>, WorkerError> {
            Ok(plaintext.to_vec())
        }

        fn decrypt(&self, _: &Value, ciphertext: &[u8]) -> Result<Vec<u8>, WorkerError> {
            Ok(ciphertext.to_vec())
        }
    }

    #[test]
    fn test_get_returns_registered_worker() {
        let registry =
            EncryptionWorkerRegistry::new(vec![FakeWorker::new("A"), FakeWorker::new("B")])
                .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("A").unwrap().uuid(), "A");
        assert_eq!(registry.get("B").unwrap().uuid(), "B");
    }

    #[test]
    fn test_get_is_idempotent() {
        let registry = EncryptionWorkerRegistry::new(vec![FakeWorker::new("A")]).unwrap();

        let first = registry.get("A").unwrap();
        let second = registry.get("A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_uuid_is_not_found() {
        let registry =
            EncryptionWorkerRegistry::new(vec![FakeWorker::new("A"), FakeWorker::new("B")])
                .unwrap();

        match registry.get("C") {
            Err(RegistryError::WorkerNotFound(uuid)) => assert_eq!(uuid, "C"),
            other => panic!("expected WorkerNotFound, got {:?}", other.map(|w| w.uuid().to_string())),
        }
    }

    #[test]
    fn test_duplicate_uuid_fails_construction() {
        let result = EncryptionWorkerRegistry::new(vec![
            FakeWorker::new("A"),
            FakeWorker::new("B"),
            FakeWorker::new("A"),
        ]);

        match result {
            Err(RegistryError::DuplicateWorkerId(uuid)) => assert_eq!(uuid, "A"),
            Err(other) => panic!("expected DuplicateWorkerId, got {other}"),
            Ok(_) => panic!("duplicate worker uuid must not construct a registry"),
        }
    }

    #[test]
    fn test_empty_uuid_fails_construction() {
        let result = EncryptionWorkerRegistry::new(vec![FakeWorker::new("")]);
        assert!(matches!(result, Err(RegistryError::EmptyWorkerId)));
    }

    #[test]
    fn test_empty_registry_is_allowed() {
        let registry = EncryptionWorkerRegistry::new(vec![]).unwrap();
        assert!(registry.is_empty());
        assert!(registry.get("anything").is_err());
    }
}
