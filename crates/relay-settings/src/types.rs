//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may specify any subset of fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "connection": { "queueCapacity": 64 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Per-connection timing and queue settings.
    pub connection: ConnectionSettings,
    /// Registry loop settings.
    pub registry: RegistrySettings,
    /// Shutdown drain settings.
    pub shutdown: ShutdownSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "connection.queueCapacity",
                "must be at least 1",
            ));
        }
        if conn.ping_period_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.pingPeriodMs",
                "must be non-zero",
            ));
        }
        if conn.write_wait_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.writeWaitMs",
                "must be non-zero",
            ));
        }
        if conn.ping_period_ms >= conn.pong_wait_ms {
            return Err(SettingsError::invalid(
                "connection.pingPeriodMs",
                format!(
                    "{} must be less than connection.pongWaitMs ({})",
                    conn.ping_period_ms, conn.pong_wait_ms
                ),
            ));
        }
        if self.registry.intake_capacity == 0 {
            return Err(SettingsError::invalid(
                "registry.intakeCapacity",
                "must be at least 1",
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::invalid(
                "server.maxMessageSize",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 512,
        }
    }
}

/// Per-connection queue and liveness settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Outbound queue capacity per peer.
    pub queue_capacity: usize,
    /// Deadline for a single outbound write, in milliseconds.
    pub write_wait_ms: u64,
    /// Inbound inactivity deadline, in milliseconds.
    pub pong_wait_ms: u64,
    /// Keepalive ping period, in milliseconds. Must be below `pong_wait_ms`.
    pub ping_period_ms: u64,
}

impl ConnectionSettings {
    /// Write deadline as a [`Duration`].
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Inactivity deadline as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Keepalive period as a [`Duration`].
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_period_ms: 30_000,
        }
    }
}

/// Registry loop settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Capacity of the registry's serialized work intake.
    pub intake_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            intake_capacity: 64,
        }
    }
}

/// Shutdown drain settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Upper bound on the drain wait, in seconds.
    pub drain_timeout_secs: u64,
}

impl ShutdownSettings {
    /// Drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
