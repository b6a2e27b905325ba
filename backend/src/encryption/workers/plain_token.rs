//! Shared-token development worker.
//!
//! Validates a handshake by comparing a token from the proof against the
//! token stored in the device's credentials, and passes payloads through
//! unchanged. Useful for local development and as the smallest possible
//! reference implementation of the worker contract; real deployments assign
//! devices a worker that actually ciphers.

use serde_json::Value;

use crate::encryption::{EncryptionWorker, WorkerError};

/// Identifier under which [`PlainTokenWorker`] registers.
pub const PLAIN_TOKEN_WORKER_ID: &str = "plain-token-v1";

#[derive(Debug, Default)]
pub struct PlainTokenWorker;

impl PlainTokenWorker {
    fn token_of(value: &Value, what: &str) -> Result<String, WorkerError> {
        value
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                WorkerError::MalformedCredentials(format!("{what} is missing a 'token' string"))
            })
    }
}

impl EncryptionWorker for PlainTokenWorker {
    fn uuid(&self) -> &str {
        PLAIN_TOKEN_WORKER_ID
    }

    fn validate_credentials(
        &self,
        credentials: &Value,
        proof: &Value,
    ) -> Result<bool, WorkerError> {
        let expected = Self::token_of(credentials, "stored credentials")?;
        // A proof without a token is a denial, not a malformed-credentials error.
        let Some(presented) = proof.get("token").and_then(Value::as_str) else {
            return Ok(false);
        };
        Ok(presented == expected)
    }

    fn encrypt(&self, _credentials: &Value, plaintext: &[u8]) -> Result<Vec<u8>, WorkerError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _credentials: &Value, ciphertext: &[u8]) -> Result<Vec<u8>, WorkerError> {
        Ok(ciphertext.to_vec())
    }
}
