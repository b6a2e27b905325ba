//! Public facade over the connection table, socket handler and sweeper.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tower_http::trace::TraceLayer;

use super::connections::{ConnectionTable, GatewayError, Recipients};
use super::hooks::{GatewayHooks, HookError};
use super::ws::{ws_handler, WsState};

/// Tunables for a gateway instance.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Bound on the unauthenticated phase: a connection that has not sent
    /// its handshake within this window is rejected.
    pub handshake_timeout: Duration,
    /// Liveness sweep period. A peer that fails to pong for one full period
    /// is terminated at the next sweep.
    pub sweep_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// The connection gateway: accepts device sockets, runs the handshake,
/// keeps the live set and exposes the send primitives.
///
/// Must be constructed inside a tokio runtime; construction starts the
/// liveness sweeper, which is owned by this value and cancelled on
/// [`shutdown`](Self::shutdown) or drop.
pub struct ConnectionGateway {
    table: Arc<ConnectionTable>,
    state: Arc<WsState>,
    sweeper: JoinHandle<()>,
}

impl ConnectionGateway {
    pub fn new(settings: GatewaySettings, hooks: GatewayHooks) -> Self {
        let table = Arc::new(ConnectionTable::new());
        let state = Arc::new(WsState {
            table: table.clone(),
            hooks,
            handshake_timeout: settings.handshake_timeout,
        });
        let sweeper = spawn_sweeper(table.clone(), settings.sweep_interval);
        Self {
            table,
            state,
            sweeper,
        }
    }

    /// Router exposing the device WebSocket endpoint at `/ws`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve the gateway on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Identities of all authenticated live connections.
    pub async fn online_device_ids(&self) -> Vec<String> {
        self.table.online_device_ids().await
    }

    /// Send a serialized document to every connection bound to `uuid`.
    pub async fn send_to_device<T: Serialize>(
        &self,
        uuid: &str,
        document: &T,
    ) -> Result<usize, GatewayError> {
        self.table.send_to_device(uuid, document).await
    }

    /// Multicast pre-encrypted payloads to every matching connection; see
    /// [`ConnectionTable::send_to_matching`].
    pub async fn send_to_matching<F, Fut>(&self, recipients: &Recipients, payloads_for: F) -> usize
    where
        F: Fn(devgate_common::Device) -> Fut,
        Fut: Future<Output = Result<Vec<String>, HookError>>,
    {
        self.table.send_to_matching(recipients, payloads_for).await
    }

    /// Stop the liveness sweeper. Open connections keep running until their
    /// sockets close; new liveness checks stop immediately.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }
}

impl Drop for ConnectionGateway {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

fn spawn_sweeper(table: Arc<ConnectionTable>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            tracing::debug!(
                "Running liveness sweep over {} connections",
                table.connection_count().await
            );
            table.sweep().await;
        }
    })
}
