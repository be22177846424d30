//! # relay-server
//!
//! Connection registry and routing core of the tunnel relay, plus its Axum
//! HTTP + `WebSocket` surface.
//!
//! - [`registry`]: the single-writer registry loop and its [`RegistryHandle`]
//! - [`websocket::connection`]: per-peer [`Connection`] with inbound monitor
//!   and outbound sender duties
//! - [`router`]: admin frame validation and acknowledgement
//! - [`shutdown`]: root cancellation and drain wait
//! - [`server`]: routes (`/ws/client`, `/ws/admin`, `/clients`, `/health`,
//!   `/metrics`) and the listener

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, ServerConfig};
pub use registry::{DeliveryReport, RegistryConfig, RegistryHandle, spawn_registry};
pub use router::AdminRouter;
pub use server::{AppState, RelayServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::{Connection, ConnectionState};
