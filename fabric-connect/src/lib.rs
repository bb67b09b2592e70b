//! Device transport layer for the storage fabric coordinator.
//!
//! Each device holds one duplex WebSocket channel to the coordinator.
//! This crate owns three things:
//!
//! - [`protocol`]: the JSON wire messages exchanged over that channel.
//! - [`registry`]: the [`registry::ConnectionRegistry`], which binds a
//!   logical device id to its live channel and turns `SendChunk` /
//!   `RequestChunk` / `DeleteChunk` into correlated request/response
//!   calls with a timeout.
//! - [`ws`]: the axum route that accepts the WebSocket upgrade and
//!   drives one connection's lifetime, dispatching inbound frames to a
//!   [`ws::DeviceEventHandler`] implementation supplied by the
//!   coordinator binary.
//!
//! # Usage
//!
//! ```ignore
//! use fabric_connect::{ConnectionRegistry, RegistryTimeouts};
//! use fabric_connect::ws::{DeviceChannelState, routes};
//!
//! let registry = ConnectionRegistry::new(RegistryTimeouts::default());
//! let state = DeviceChannelState { registry, handler, heartbeat_interval };
//! let router = routes(state);
//! ```

pub mod protocol;
pub mod registry;
pub mod ws;

pub use protocol::{InboundMessage, OutboundMessage, ParseError};
pub use registry::{ChunkAssignment, ConnectionRegistry, RegistryTimeouts};
pub use ws::{DeviceChannelState, DeviceEventHandler};
