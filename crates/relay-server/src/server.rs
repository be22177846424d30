//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::{RegistryConfig, RegistryHandle, spawn_registry};
use crate::router::AdminRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{admin, client};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry.
    pub registry: RegistryHandle,
    /// Admin request router.
    pub router: AdminRouter,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Max inbound client message size.
    pub max_message_size: usize,
}

/// The relay server.
///
/// Constructing one starts the registry loop, so it must be created inside a
/// Tokio runtime.
pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
    registry_task: JoinHandle<()>,
}

impl RelayServer {
    /// Create a server and start its registry loop.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::with_timeout(Some(config.drain_timeout)));
        let (registry, registry_task) = spawn_registry(
            RegistryConfig {
                intake_capacity: config.intake_capacity,
                connection: config.connection,
            },
            shutdown.token(),
        );
        shutdown.watch(registry.drained_token());

        let state = AppState {
            router: AdminRouter::new(registry.clone()),
            registry,
            shutdown,
            start_time: Instant::now(),
            metrics,
            max_message_size: config.max_message_size,
        };
        Self {
            config,
            state,
            registry_task,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/client", get(client::client_ws_handler))
            .route("/ws/admin", get(admin::admin_ws_handler))
            .route("/clients", get(clients_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown is initiated.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "relay listening");

        let app = self.router();
        let stop = self.state.shutdown.token().cancelled_owned();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop)
                .await
        });
        Ok(ServerHandle { addr, task })
    }

    /// The connection registry.
    pub fn registry(&self) -> &RegistryHandle {
        &self.state.registry
    }

    /// The admin router.
    pub fn admin_router(&self) -> &AdminRouter {
        &self.state.router
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Initiate shutdown and wait for the drain.
    ///
    /// Returns `false` if the drain timed out.
    pub async fn stop(self) -> bool {
        let _ = self.state.shutdown.initiate();
        let complete = self.state.shutdown.await_complete().await;
        if complete {
            if let Err(err) = self.registry_task.await {
                warn!(error = %err, "registry task failed");
            }
        }
        complete
    }
}

/// A running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the HTTP server to stop accepting.
    pub async fn wait(self) -> std::io::Result<()> {
        match self.task.await {
            Ok(res) => res,
            Err(err) => Err(std::io::Error::other(err)),
        }
    }
}

/// GET /clients
async fn clients_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids = state.registry.connected_peer_ids();
    Json(json!({ "connected_clients": ids }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
