//! WebSocket surface: peer connections and the admin channel.

pub mod admin;
pub mod client;
pub mod connection;
