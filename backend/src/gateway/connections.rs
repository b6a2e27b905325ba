//! Live connection set and the send primitives built on top of it.
//!
//! The table is the single piece of shared mutable state in the gateway. An
//! entry exists only for connections that completed the handshake; it is
//! inserted by the socket task on authentication and removed by the same
//! task when the socket closes or the liveness sweep terminates it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::AbortHandle;

use devgate_common::Device;

use super::hooks::HookError;

/// Errors surfaced to callers of the send primitives and `serve`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No authenticated live connection is bound to the device. Delivery is
    /// fire-and-drop: nothing is queued or retried.
    #[error("device '{0}' is not connected")]
    NotConnected(String),
    #[error("failed to serialize outbound document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frames pushed from the gateway side into a connection's socket task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// JSON text (a serialized document or a pre-encrypted payload).
    Frame(String),
    /// Liveness probe; the socket task writes a protocol-level ping.
    Ping,
}

/// Selector for multicast recipients.
pub enum Recipients {
    /// A fixed set of device identities.
    Ids(HashSet<String>),
    /// A predicate over device records.
    Matching(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl Recipients {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&Device) -> bool + Send + Sync + 'static,
    {
        Self::Matching(Box::new(predicate))
    }

    fn matches(&self, device: &Device) -> bool {
        match self {
            Self::Ids(uuids) => uuids.contains(&device.uuid),
            Self::Matching(predicate) => predicate(device),
        }
    }
}

/// One authenticated connection.
pub(crate) struct ConnectionEntry {
    pub device: Device,
    pub tx: mpsc::Sender<Outbound>,
    /// Cleared by the sweep, set back by the socket task on pong.
    pub alive: Arc<AtomicBool>,
    /// Handle to the connection's socket pump task. Aborting it drops the
    /// socket, which is how an unresponsive peer is reaped: the pump may be
    /// parked on a write to a stalled socket and its outbound channel full,
    /// so the reap cannot go through either of them.
    pub abort: AbortHandle,
    pub connected_at: DateTime<Utc>,
}

/// The set of authenticated live connections.
#[derive(Default)]
pub struct ConnectionTable {
    entries: RwLock<HashMap<u64, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticated connection; returns its table id.
    pub(crate) async fn insert(
        &self,
        device: Device,
        tx: mpsc::Sender<Outbound>,
        alive: Arc<AtomicBool>,
        abort: AbortHandle,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ConnectionEntry {
            device,
            tx,
            alive,
            abort,
            connected_at: Utc::now(),
        };
        self.entries.write().await.insert(id, entry);
        id
    }

    pub(crate) async fn remove(&self, id: u64) -> Option<ConnectionEntry> {
        self.entries.write().await.remove(&id)
    }

    /// Identities of all authenticated live connections. A device connected
    /// twice appears twice, matching the connection-oriented view.
    pub async fn online_device_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.device.uuid.clone())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Serialize `document` once and write it to every connection bound to
    /// `uuid`. Normally that is exactly one connection, but duplicates are
    /// tolerated and all of them get the frame.
    pub async fn send_to_device<T: Serialize>(
        &self,
        uuid: &str,
        document: &T,
    ) -> Result<usize, GatewayError> {
        let text = serde_json::to_string(document)?;

        let targets: Vec<mpsc::Sender<Outbound>> = {
            self.entries
                .read()
                .await
                .values()
                .filter(|entry| entry.device.uuid == uuid)
                .map(|entry| entry.tx.clone())
                .collect()
        };

        if targets.is_empty() {
            return Err(GatewayError::NotConnected(uuid.to_string()));
        }

        let mut delivered = 0;
        for tx in targets {
            if tx.send(Outbound::Frame(text.clone())).await.is_ok() {
                delivered += 1;
            } else {
                tracing::warn!("Connection for device {} went away during send", uuid);
            }
        }
        Ok(delivered)
    }

    /// Fan a multicast out to every connection matching `recipients`.
    ///
    /// `payloads_for` is invoked once per matched connection with the bound
    /// device record and returns the pre-encrypted payloads to write to that
    /// socket, in order. Recipients proceed concurrently and failures stay
    /// per-recipient: one stalled or closed connection never blocks the rest.
    /// Returns the number of recipients fully written to.
    pub async fn send_to_matching<F, Fut>(&self, recipients: &Recipients, payloads_for: F) -> usize
    where
        F: Fn(Device) -> Fut,
        Fut: Future<Output = Result<Vec<String>, HookError>>,
    {
        let matched: Vec<(Device, mpsc::Sender<Outbound>)> = {
            self.entries
                .read()
                .await
                .values()
                .filter(|entry| recipients.matches(&entry.device))
                .map(|entry| (entry.device.clone(), entry.tx.clone()))
                .collect()
        };

        let deliveries = matched.into_iter().map(|(device, tx)| {
            let uuid = device.uuid.clone();
            let payloads = payloads_for(device);
            async move {
                let frames = match payloads.await {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!("Payload builder failed for device {}: {}", uuid, e);
                        return false;
                    }
                };
                for frame in frames {
                    if tx.send(Outbound::Frame(frame)).await.is_err() {
                        tracing::warn!("Connection for device {} went away mid-multicast", uuid);
                        return false;
                    }
                }
                true
            }
        });

        join_all(deliveries).await.into_iter().filter(|ok| *ok).count()
    }

    /// One liveness pass: connections already marked not-alive are reaped,
    /// everyone else is marked not-alive and pinged. A pong before the next
    /// pass flips the flag back.
    ///
    /// The reap goes through the abort handle, not the outbound channel: a
    /// peer that stopped reading leaves the pump parked on a socket write
    /// with a backed-up channel, and neither may delay termination. The
    /// aborted pump's parent future removes the entry and fires the offline
    /// notification.
    pub(crate) async fn sweep(&self) {
        let entries = self.entries.read().await;
        for (id, entry) in entries.iter() {
            if !entry.alive.load(Ordering::SeqCst) {
                tracing::warn!(
                    "Terminating unresponsive connection {} (device {})",
                    id,
                    entry.device.uuid
                );
                entry.abort.abort();
                continue;
            }
            entry.alive.store(false, Ordering::SeqCst);
            // try_send: a peer with a full outbound queue must not stall the
            // sweep; the ping is lost but the peer fails the next pass.
            let _ = entry.tx.try_send(Outbound::Ping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::task::JoinHandle;

    fn device(uuid: &str) -> Device {
        Device::new(uuid, "plain-token-v1", json!({"token": "t"}))
    }

    struct TestConn {
        id: u64,
        rx: mpsc::Receiver<Outbound>,
        alive: Arc<AtomicBool>,
        /// Stand-in for the socket pump task; the sweep aborts it to reap.
        pump: JoinHandle<()>,
    }

    async fn connect(table: &ConnectionTable, uuid: &str) -> TestConn {
        connect_with_capacity(table, uuid, 32).await
    }

    async fn connect_with_capacity(
        table: &ConnectionTable,
        uuid: &str,
        capacity: usize,
    ) -> TestConn {
        let (tx, rx) = mpsc::channel(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(std::future::pending());
        let id = table
            .insert(device(uuid), tx, alive.clone(), pump.abort_handle())
            .await;
        TestConn {
            id,
            rx,
            alive,
            pump,
        }
    }

    fn expect_frame(rx: &mut mpsc::Receiver<Outbound>) -> String {
        match rx.try_recv() {
            Ok(Outbound::Frame(text)) => text,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_online_device_ids() {
        let table = ConnectionTable::new();
        let _conn = connect(&table, "dev-1").await;

        let online = table.online_device_ids().await;
        assert_eq!(online, vec!["dev-1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_drops_from_online_set() {
        let table = ConnectionTable::new();
        let conn = connect(&table, "dev-1").await;
        assert_eq!(table.connection_count().await, 1);

        assert!(table.remove(conn.id).await.is_some());
        assert!(table.online_device_ids().await.is_empty());
        assert_eq!(table.connection_count().await, 0);
        assert!(table.remove(conn.id).await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_device_delivers_serialized_document() {
        let table = ConnectionTable::new();
        let mut conn = connect(&table, "dev-1").await;

        let delivered = table
            .send_to_device("dev-1", &json!({"cmd": "ping"}))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(expect_frame(&mut conn.rx), r#"{"cmd":"ping"}"#);
    }

    #[tokio::test]
    async fn test_send_to_device_reaches_duplicate_connections() {
        let table = ConnectionTable::new();
        let mut a = connect(&table, "dev-1").await;
        let mut b = connect(&table, "dev-1").await;

        let delivered = table.send_to_device("dev-1", &json!({"n": 1})).await.unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(expect_frame(&mut a.rx), r#"{"n":1}"#);
        assert_eq!(expect_frame(&mut b.rx), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_send_to_unknown_device_is_not_connected() {
        let table = ConnectionTable::new();
        let _conn = connect(&table, "dev-1").await;

        let result = table.send_to_device("dev-2", &json!({})).await;
        match result {
            Err(GatewayError::NotConnected(uuid)) => assert_eq!(uuid, "dev-2"),
            other => panic!("expected NotConnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multicast_by_ids_writes_payloads_in_order() {
        let table = ConnectionTable::new();
        let mut a = connect(&table, "dev-1").await;
        let mut b = connect(&table, "dev-2").await;
        let mut c = connect(&table, "dev-3").await;

        let recipients = Recipients::ids(["dev-1", "dev-3"]);
        let written = table
            .send_to_matching(&recipients, |device| async move {
                Ok(vec![
                    format!("{}:first", device.uuid),
                    format!("{}:second", device.uuid),
                ])
            })
            .await;

        assert_eq!(written, 2);
        assert_eq!(expect_frame(&mut a.rx), "dev-1:first");
        assert_eq!(expect_frame(&mut a.rx), "dev-1:second");
        assert_eq!(expect_frame(&mut c.rx), "dev-3:first");
        assert_eq!(expect_frame(&mut c.rx), "dev-3:second");
        // Unmatched connections receive nothing.
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multicast_by_predicate() {
        let table = ConnectionTable::new();
        let mut a = connect(&table, "sensor-1").await;
        let mut b = connect(&table, "camera-1").await;

        let recipients = Recipients::matching(|device| device.uuid.starts_with("sensor-"));
        let written = table
            .send_to_matching(&recipients, |_| async { Ok(vec!["payload".to_string()]) })
            .await;

        assert_eq!(written, 1);
        assert_eq!(expect_frame(&mut a.rx), "payload");
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multicast_failure_is_per_recipient() {
        let table = ConnectionTable::new();
        let mut a = connect(&table, "dev-1").await;
        let mut b = connect(&table, "dev-2").await;

        let recipients = Recipients::ids(["dev-1", "dev-2"]);
        let written = table
            .send_to_matching(&recipients, |device| async move {
                if device.uuid == "dev-1" {
                    Err("no credentials".into())
                } else {
                    Ok(vec!["ok".to_string()])
                }
            })
            .await;

        assert_eq!(written, 1);
        assert!(a.rx.try_recv().is_err());
        assert_eq!(expect_frame(&mut b.rx), "ok");
    }

    #[tokio::test]
    async fn test_sweep_pings_then_aborts_the_pump() {
        let table = ConnectionTable::new();
        let mut conn = connect(&table, "dev-1").await;

        // First pass: marked not-alive and pinged.
        table.sweep().await;
        assert!(matches!(conn.rx.try_recv(), Ok(Outbound::Ping)));
        assert!(!conn.alive.load(Ordering::SeqCst));

        // No pong arrived: second pass aborts the socket pump.
        table.sweep().await;
        let err = conn.pump.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_pong_before_next_sweep_keeps_connection() {
        let table = ConnectionTable::new();
        let mut conn = connect(&table, "dev-1").await;

        table.sweep().await;
        assert!(matches!(conn.rx.try_recv(), Ok(Outbound::Ping)));

        // Socket task observed a pong.
        conn.alive.store(true, Ordering::SeqCst);

        table.sweep().await;
        assert!(matches!(conn.rx.try_recv(), Ok(Outbound::Ping)));
        assert!(!conn.pump.is_finished());
    }

    #[tokio::test]
    async fn test_peer_with_full_outbound_channel_is_still_reaped() {
        let table = ConnectionTable::new();
        // Capacity one, pre-filled: the pump never drains, so every
        // subsequent try_send on this connection fails.
        let conn = connect_with_capacity(&table, "dev-1", 1).await;
        table.send_to_device("dev-1", &json!({"n": 1})).await.unwrap();

        // The dropped ping must not keep the connection alive forever.
        table.sweep().await;
        assert!(!conn.alive.load(Ordering::SeqCst));
        table.sweep().await;

        let err = conn.pump.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
