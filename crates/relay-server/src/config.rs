//! Server and connection configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

/// Timing and queue limits applied to every peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Deadline for a single outbound write (including the final close frame).
    pub write_wait: Duration,
    /// Inbound inactivity deadline; any read resets it.
    pub pong_wait: Duration,
    /// Keepalive ping period.
    pub ping_period: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(30),
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of the registry intake.
    pub intake_capacity: usize,
    /// Upper bound on the shutdown drain.
    pub drain_timeout: Duration,
    /// Per-connection limits.
    pub connection: ConnectionConfig,
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_message_size: 512,
            intake_capacity: 64,
            drain_timeout: Duration::from_secs(30),
            connection: ConnectionConfig::default(),
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            intake_capacity: settings.registry.intake_capacity,
            drain_timeout: settings.shutdown.drain_timeout(),
            connection: ConnectionConfig {
                queue_capacity: settings.connection.queue_capacity,
                write_wait: settings.connection.write_wait(),
                pong_wait: settings.connection.pong_wait(),
                ping_period: settings.connection.ping_period(),
            },
        }
    }
}
