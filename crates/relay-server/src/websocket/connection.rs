//! A single peer's live connection and its two duties.
//!
//! A [`Connection`] is shared by its inbound monitor, its outbound sender,
//! and the registry. Termination is a single `open → closing` transition;
//! the connection reaches `closed` once both duties have exited.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use relay_core::{PeerId, RelayError};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::registry::RegistryHandle;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Number of duties each connection runs.
const DUTIES: usize = 2;

/// Lifecycle of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting payloads.
    Open,
    /// Terminated; one or both duties still running.
    Closing,
    /// Both duties have exited.
    Closed,
}

/// One live peer.
pub struct Connection {
    peer_id: PeerId,
    serial: u64,
    outbound: Mutex<Option<mpsc::Sender<Utf8Bytes>>>,
    state: AtomicU8,
    live_duties: AtomicUsize,
    stop: CancellationToken,
    exited: CancellationToken,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn new(
        peer_id: PeerId,
        serial: u64,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Arc::new(Self {
            peer_id,
            serial,
            outbound: Mutex::new(Some(tx)),
            state: AtomicU8::new(OPEN),
            live_duties: AtomicUsize::new(DUTIES),
            stop: CancellationToken::new(),
            exited: CancellationToken::new(),
        });
        (conn, rx)
    }

    /// Peer id this connection was registered under.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Process-unique serial number.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether the connection still accepts payloads.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Whether both duties have exited.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Wait until both duties have exited.
    pub async fn closed(&self) {
        self.exited.cancelled().await;
    }

    /// Queue a payload without blocking.
    ///
    /// Returns `false` if the queue is full or the connection is no longer
    /// open; the payload is dropped.
    pub fn enqueue(&self, payload: Utf8Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.try_send(payload).is_ok(),
            None => false,
        }
    }

    /// Like [`enqueue`](Self::enqueue), reporting why a payload was refused.
    pub fn try_enqueue(&self, payload: Utf8Bytes) -> Result<(), RelayError> {
        if self.enqueue(payload) {
            Ok(())
        } else if self.is_open() {
            Err(RelayError::CapacityExceeded {
                peer_id: self.peer_id.to_string(),
            })
        } else {
            Err(RelayError::Transport("connection closed".into()))
        }
    }

    /// Terminate the connection. Idempotent.
    ///
    /// Only the first caller wins the `open → closing` transition; it
    /// releases the outbound queue and signals both duties to stop. Returns
    /// whether this call performed the termination.
    pub fn terminate(&self) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        drop(self.outbound.lock().take());
        self.stop.cancel();
        debug!(peer_id = %self.peer_id, serial = self.serial, "connection terminated");
        true
    }

    fn duty_exited(&self) {
        if self.live_duties.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.store(CLOSED, Ordering::Release);
            self.exited.cancel();
            trace!(peer_id = %self.peer_id, serial = self.serial, "connection closed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.peer_id)
            .field("serial", &self.serial)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Held by a running duty; dropping it records the duty's exit.
///
/// Exiting a duty for any reason terminates the connection.
pub(crate) struct DutyGuard(Arc<Connection>);

impl DutyGuard {
    pub(crate) fn new(conn: &Arc<Connection>) -> Self {
        Self(Arc::clone(conn))
    }
}

impl Drop for DutyGuard {
    fn drop(&mut self) {
        let _ = self.0.terminate();
        self.0.duty_exited();
    }
}

/// Outbound sender duty.
///
/// Writes queued payloads in order and pings every `ping_period`. Any write
/// failure terminates the connection. Once stopped, a final close frame is
/// sent under the write deadline.
#[instrument(skip_all, fields(peer_id = %conn.peer_id, serial = conn.serial))]
pub(crate) async fn run_outbound<S>(
    conn: Arc<Connection>,
    mut queue: mpsc::Receiver<Utf8Bytes>,
    mut sink: S,
    config: ConnectionConfig,
    guard: DutyGuard,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let _guard = guard;
    let mut ping = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            () = conn.stop.cancelled() => break,
            payload = queue.recv() => match payload {
                Some(text) => Message::Text(text),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        let is_ping = matches!(frame, Message::Ping(_));
        if let Err(err) = write_frame(&mut sink, frame, config.write_wait, &conn.stop).await {
            if !conn.stop.is_cancelled() {
                warn!(error = %err, ping = is_ping, "write failed, terminating connection");
            }
            let _ = conn.terminate();
            break;
        }
        if is_ping {
            trace!("sent ping");
        }
    }

    send_close(&mut sink, config.write_wait).await;
}

/// Send a close frame and close the sink, each under `write_wait`.
pub(crate) async fn send_close<S>(sink: &mut S, write_wait: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match time::timeout(write_wait, sink.send(Message::Close(None))).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "close frame not sent"),
        Err(_) => debug!("close frame timed out"),
    }
    let _ = time::timeout(write_wait, sink.close()).await;
}

async fn write_frame<S>(
    sink: &mut S,
    frame: Message,
    write_wait: Duration,
    stop: &CancellationToken,
) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    tokio::select! {
        biased;
        () = stop.cancelled() => Err(RelayError::Transport("write interrupted".into())),
        res = time::timeout(write_wait, sink.send(frame)) => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(RelayError::Transport(err.to_string())),
            Err(_) => Err(RelayError::Transport("write timed out".into())),
        },
    }
}

/// Why the inbound monitor stopped reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InboundExit {
    /// `terminate()` was called elsewhere.
    Terminated,
    /// No frame arrived within `pong_wait`.
    Idle,
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The transport returned an error.
    Failed(String),
}

/// Inbound monitor duty.
///
/// Drains the transport; every frame (including pongs) resets the
/// inactivity deadline. On exit the connection is unregistered and then
/// terminated.
#[instrument(skip_all, fields(peer_id = %conn.peer_id, serial = conn.serial))]
pub(crate) async fn run_inbound<St, E>(
    conn: Arc<Connection>,
    mut stream: St,
    registry: RegistryHandle,
    pong_wait: Duration,
    guard: DutyGuard,
) -> InboundExit
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let _guard = guard;
    let exit = loop {
        let next = tokio::select! {
            biased;
            () = conn.stop.cancelled() => break InboundExit::Terminated,
            next = time::timeout(pong_wait, stream.next()) => next,
        };
        match next {
            Err(_) => break InboundExit::Idle,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break InboundExit::PeerClosed,
            Ok(Some(Err(err))) => break InboundExit::Failed(err.to_string()),
            Ok(Some(Ok(_))) => {}
        }
    };

    match &exit {
        InboundExit::Terminated => trace!("inbound monitor stopped"),
        InboundExit::Idle => debug!(?pong_wait, "peer idle past deadline"),
        InboundExit::PeerClosed => debug!("peer closed connection"),
        InboundExit::Failed(err) => debug!(error = %err, "read failed"),
    }

    registry.unregister(&conn).await;
    let _ = conn.terminate();
    exit
}
