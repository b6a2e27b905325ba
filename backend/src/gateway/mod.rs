//! Connection gateway for device messaging.
//!
//! This module provides:
//! - WebSocket server for device connections with a one-shot handshake
//! - Live connection table with unicast and multicast send primitives
//! - Ping/pong liveness sweep that reaps unresponsive peers
//! - Callback contracts for authentication, messages and offline tracking

mod connections;
mod hooks;
mod service;
mod ws;

pub use connections::{ConnectionTable, GatewayError, Recipients};
pub use hooks::{
    AuthOutcome, AuthedMessageHandler, AuthenticationResolver, GatewayHooks, HookError,
    OfflineNotifier,
};
pub use service::{ConnectionGateway, GatewaySettings};
