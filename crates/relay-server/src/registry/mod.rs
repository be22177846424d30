//! The connection registry.
//!
//! A single task ([`hub`]) owns every mutation of the `PeerId → Connection`
//! map. Callers reach it through a cloneable [`RegistryHandle`]; read-only
//! queries take a snapshot under a `parking_lot::RwLock` without entering the
//! loop.

mod hub;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use parking_lot::RwLock;
use relay_core::{AdminMessage, PeerId, RelayError, Result};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::websocket::connection::{self, Connection, DutyGuard};

pub(crate) type PeerMap = Arc<RwLock<HashMap<PeerId, Arc<Connection>>>>;

/// Outcome of one delivery, reported by [`RegistryHandle::deliver`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections that accepted the payload.
    pub delivered: usize,
    /// Connections that refused it and were terminated.
    pub dropped: usize,
    /// The named target was not registered.
    pub not_found: bool,
}

/// Registry limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Capacity of the serialized intake.
    pub intake_capacity: usize,
    /// Limits applied to every served connection.
    pub connection: ConnectionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 64,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Work accepted by the registry loop.
pub(crate) enum Command {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Deliver {
        message: AdminMessage,
        reply: Option<oneshot::Sender<DeliveryReport>>,
    },
}

/// Cloneable handle to the registry loop.
#[derive(Clone)]
pub struct RegistryHandle {
    intake: mpsc::Sender<Command>,
    peers: PeerMap,
    tracker: TaskTracker,
    cancel: CancellationToken,
    drained: CancellationToken,
    serials: Arc<AtomicU64>,
    connection: ConnectionConfig,
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("connections", &self.connection_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// Start the registry loop.
///
/// The loop drains and exits once `cancel` fires.
pub fn spawn_registry(
    config: RegistryConfig,
    cancel: CancellationToken,
) -> (RegistryHandle, JoinHandle<()>) {
    let (intake, rx) = mpsc::channel(config.intake_capacity.max(1));
    let handle = RegistryHandle {
        intake,
        peers: Arc::default(),
        tracker: TaskTracker::new(),
        cancel,
        drained: CancellationToken::new(),
        serials: Arc::new(AtomicU64::new(1)),
        connection: config.connection,
    };

    let task = tokio::spawn(hub::run(
        rx,
        Arc::clone(&handle.peers),
        handle.cancel.clone(),
        handle.tracker.clone(),
        handle.drained.clone(),
    ));
    (handle, task)
}

impl RegistryHandle {
    /// Take over an accepted transport for `peer_id`.
    ///
    /// Spawns the outbound sender, registers the connection, then spawns the
    /// inbound monitor, so the monitor's unregister always follows the
    /// register in the intake.
    ///
    /// Once shutdown has begun no duty is started: the transport is sent a
    /// close frame inline and the returned connection is already closed.
    pub async fn serve<S, St, E>(
        &self,
        peer_id: PeerId,
        mut sink: S,
        stream: St,
    ) -> Arc<Connection>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: fmt::Display + Send,
        St: Stream<Item = std::result::Result<Message, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        // Taken before the shutdown check: a drain that has not yet been
        // requested cannot finish until both duties are tracked.
        let _token = self.tracker.token();

        let serial = self.serials.fetch_add(1, Ordering::Relaxed);
        let (conn, queue) = Connection::new(peer_id, serial, self.connection.queue_capacity);
        let outbound_guard = DutyGuard::new(&conn);
        let inbound_guard = DutyGuard::new(&conn);

        if self.cancel.is_cancelled() {
            debug!(peer_id = %conn.peer_id(), serial, "relay shutting down, connection refused");
            drop((queue, stream));
            connection::send_close(&mut sink, self.connection.write_wait).await;
            drop((outbound_guard, inbound_guard));
            return conn;
        }

        let _ = self.tracker.spawn(connection::run_outbound(
            Arc::clone(&conn),
            queue,
            sink,
            self.connection,
            outbound_guard,
        ));

        if let Err(err) = self.register(Arc::clone(&conn)).await {
            debug!(peer_id = %conn.peer_id(), error = %err, "registration refused");
            let _ = conn.terminate();
        }

        let _ = self.tracker.spawn(connection::run_inbound(
            Arc::clone(&conn),
            stream,
            self.clone(),
            self.connection.pong_wait,
            inbound_guard,
        ));
        conn
    }

    /// Hand an admin message to the loop without waiting for its outcome.
    pub async fn submit(&self, message: AdminMessage) -> Result<()> {
        self.send(Command::Deliver {
            message,
            reply: None,
        })
        .await
    }

    /// Hand an admin message to the loop and wait for its outcome.
    pub async fn deliver(&self, message: AdminMessage) -> Result<DeliveryReport> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Deliver {
            message,
            reply: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| RelayError::ShuttingDown)
    }

    /// Sorted snapshot of registered peer ids.
    pub fn connected_peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.peers.read().len()
    }

    /// The connection currently registered under `peer_id`.
    pub fn connection(&self, peer_id: &PeerId) -> Option<Arc<Connection>> {
        self.peers.read().get(peer_id).cloned()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the loop has finished draining.
    pub fn is_drained(&self) -> bool {
        self.drained.is_cancelled()
    }

    /// Wait until the loop has drained and every connection duty has exited.
    pub async fn drained(&self) {
        self.drained.cancelled().await;
    }

    /// Token that fires once draining completes.
    pub fn drained_token(&self) -> CancellationToken {
        self.drained.clone()
    }

    pub(crate) async fn register(&self, conn: Arc<Connection>) -> Result<()> {
        self.send(Command::Register(conn)).await
    }

    /// Request removal of `conn`. A no-op once shutdown has begun, since the
    /// drain clears the map itself.
    pub(crate) async fn unregister(&self, conn: &Arc<Connection>) {
        let _ = self.send(Command::Unregister(Arc::clone(conn))).await;
    }

    async fn send(&self, command: Command) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::ShuttingDown);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RelayError::ShuttingDown),
            res = self.intake.send(command) => res.map_err(|_| RelayError::ShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests;
