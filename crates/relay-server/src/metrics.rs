//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Client connections registered (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Client connections removed from the registry (counter).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Currently registered client connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connections replaced under the same peer id (counter).
pub const EVICTIONS_TOTAL: &str = "relay_evictions_total";
/// Payloads accepted into an outbound queue (counter).
pub const MESSAGES_DELIVERED_TOTAL: &str = "relay_messages_delivered_total";
/// Payloads dropped on a full or closed queue (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "relay_messages_dropped_total";
/// Admin requests rejected (counter, labels: code).
pub const ADMIN_REJECTED_TOTAL: &str = "relay_admin_rejected_total";
