//! `GET /ws/admin` session.
//!
//! Every inbound frame is routed through the [`AdminRouter`] and answered
//! with one acknowledgement frame. Sessions end on close, read error, or
//! relay shutdown.

use std::fmt;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use relay_core::{AdminAck, RelayError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::router::AdminRouter;
use crate::server::AppState;

/// Upgrade an admin connection.
pub(crate) async fn admin_ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let router = state.router.clone();
    let cancel = state.shutdown.token();
    ws.on_upgrade(move |socket| async move {
        info!("admin websocket connected");
        let (sink, stream) = socket.split();
        run_admin_session(sink, stream, router, cancel).await;
    })
}

/// Serve one admin session until it closes or the relay shuts down.
#[instrument(skip_all)]
pub async fn run_admin_session<S, St, E>(
    mut sink: S,
    mut stream: St,
    router: AdminRouter,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        let ack = match frame {
            Some(Ok(Message::Text(text))) => router.route(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => router.route(text).await,
                Err(_) => AdminAck::rejected(&RelayError::validation("invalid json")),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!(error = %err, "admin read failed");
                break;
            }
        };

        if let Err(err) = sink.send(Message::Text(ack.to_json().into())).await {
            debug!(error = %err, "admin ack write failed");
            break;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    info!("admin websocket closed");
}
