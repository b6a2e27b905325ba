//! Devgate Common Types
//!
//! Shared types used by the gateway backend and by tooling that talks to it:
//! the device record consumed from the management plane, and the small wire
//! protocol spoken over the WebSocket connection.

pub mod device;
pub mod protocol;

pub use device::Device;
pub use protocol::{AuthRequest, ErrorEnvelope};
