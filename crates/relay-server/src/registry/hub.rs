//! The registry loop.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use relay_core::{AdminMessage, PeerEnvelope, RelayError, Target};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{Command, DeliveryReport, PeerMap};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL, EVICTIONS_TOTAL,
    MESSAGES_DELIVERED_TOTAL, MESSAGES_DROPPED_TOTAL,
};
use crate::websocket::connection::Connection;

pub(super) async fn run(
    mut intake: mpsc::Receiver<Command>,
    peers: PeerMap,
    cancel: CancellationToken,
    tracker: TaskTracker,
    drained: CancellationToken,
) {
    let hub = Hub { peers };
    info!("registry started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = intake.recv() => match command {
                Some(command) => hub.handle(command),
                None => break,
            },
        }
    }

    info!("registry shutdown initiated");
    hub.drain(&mut intake);
    tracker.close();
    tracker.wait().await;
    drained.cancel();
    info!("registry shutdown complete");
}

struct Hub {
    peers: PeerMap,
}

impl Hub {
    fn handle(&self, command: Command) {
        match command {
            Command::Register(conn) => self.register(conn),
            Command::Unregister(conn) => self.unregister(&conn),
            Command::Deliver { message, reply } => {
                let report = self.deliver(&message);
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
        }
    }

    fn register(&self, conn: Arc<Connection>) {
        if !conn.is_open() {
            debug!(
                peer_id = %conn.peer_id(),
                serial = conn.serial(),
                "connection closed before registration"
            );
            return;
        }

        let active = {
            let mut peers = self.peers.write();
            if let Some(old) = peers.get(conn.peer_id()) {
                warn!(
                    peer_id = %conn.peer_id(),
                    old_serial = old.serial(),
                    serial = conn.serial(),
                    "replacing existing client"
                );
                let _ = old.terminate();
                metrics::counter!(EVICTIONS_TOTAL).increment(1);
                metrics::counter!(DISCONNECTIONS_TOTAL).increment(1);
            }
            let _ = peers.insert(conn.peer_id().clone(), Arc::clone(&conn));
            peers.len()
        };

        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        set_active(active);
        info!(peer_id = %conn.peer_id(), serial = conn.serial(), "client registered");
    }

    fn unregister(&self, conn: &Arc<Connection>) {
        if self.remove(conn) {
            info!(peer_id = %conn.peer_id(), serial = conn.serial(), "client unregistered");
        } else {
            debug!(
                peer_id = %conn.peer_id(),
                serial = conn.serial(),
                "stale unregister ignored"
            );
        }
    }

    /// Remove `conn` only if it is the entry currently stored for its id.
    fn remove(&self, conn: &Arc<Connection>) -> bool {
        let active = {
            let mut peers = self.peers.write();
            match peers.get(conn.peer_id()) {
                Some(current) if Arc::ptr_eq(current, conn) => {
                    let _ = peers.remove(conn.peer_id());
                    peers.len()
                }
                _ => return false,
            }
        };
        metrics::counter!(DISCONNECTIONS_TOTAL).increment(1);
        set_active(active);
        true
    }

    fn deliver(&self, message: &AdminMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let targets: Vec<Arc<Connection>> = match &message.target {
            Target::All => self.peers.read().values().cloned().collect(),
            Target::Peer(id) => {
                let found = self.peers.read().get(id).cloned();
                if let Some(conn) = found {
                    vec![conn]
                } else {
                    let err = RelayError::TargetNotFound {
                        target: id.to_string(),
                    };
                    warn!(error = %err, code = err.code(), "admin target not found");
                    report.not_found = true;
                    return report;
                }
            }
        };

        let payload = Utf8Bytes::from(PeerEnvelope::admin(message.message.as_str()).to_json());
        for conn in targets {
            let Err(err) = conn.try_enqueue(payload.clone()) else {
                report.delivered += 1;
                continue;
            };
            // Already-terminated connections still in the map land here too.
            warn!(
                peer_id = %conn.peer_id(),
                serial = conn.serial(),
                error = %err,
                code = err.code(),
                "client send buffer full or closed"
            );
            let _ = conn.terminate();
            let _ = self.remove(&conn);
            report.dropped += 1;
        }

        metrics::counter!(MESSAGES_DELIVERED_TOTAL).increment(report.delivered as u64);
        metrics::counter!(MESSAGES_DROPPED_TOTAL).increment(report.dropped as u64);
        debug!(
            target = %message.target,
            delivered = report.delivered,
            dropped = report.dropped,
            "admin message dispatched"
        );
        report
    }

    /// Terminate every registered connection, including ones whose
    /// registration is still buffered in the intake, and clear the map.
    fn drain(&self, intake: &mut mpsc::Receiver<Command>) {
        intake.close();
        while let Ok(command) = intake.try_recv() {
            match command {
                Command::Register(conn) => {
                    let _ = conn.terminate();
                }
                Command::Unregister(_) | Command::Deliver { .. } => {}
            }
        }

        let drained: Vec<Arc<Connection>> = {
            let mut peers = self.peers.write();
            peers.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &drained {
            let _ = conn.terminate();
        }
        metrics::counter!(DISCONNECTIONS_TOTAL).increment(drained.len() as u64);
        set_active(0);
        info!(terminated = drained.len(), "registry drained");
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_active(count: usize) {
    metrics::gauge!(CONNECTIONS_ACTIVE).set(count as f64);
}
