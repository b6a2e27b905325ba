//! Built-in encryption workers.
//!
//! Workers are registered through the explicit list returned by [`all`];
//! adding a worker means adding it there. The registry rejects empty and
//! duplicate identifiers at startup.

mod plain_token;

pub use plain_token::{PlainTokenWorker, PLAIN_TOKEN_WORKER_ID};

use std::sync::Arc;

use super::EncryptionWorker;

/// The startup registration list.
pub fn all() -> Vec<Arc<dyn EncryptionWorker>> {
    vec![Arc::new(PlainTokenWorker::default())]
}
