//! `GET /ws/client?id=<peer>` upgrade.

use axum::Json;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use relay_core::{PeerId, RelayError};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::server::AppState;

/// Query string of a client upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    /// Peer id to register under.
    pub id: Option<String>,
}

fn reject(status: StatusCode, err: &RelayError) -> Response {
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Validate the peer id, upgrade, and hand the split socket to the registry.
pub(crate) async fn client_ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ClientQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let peer_id = match PeerId::new(query.id.unwrap_or_default()) {
        Ok(id) => id,
        Err(err) => {
            debug!(error = %err, "client upgrade rejected");
            return reject(StatusCode::BAD_REQUEST, &err);
        }
    };

    if state.registry.is_shutting_down() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, &RelayError::ShuttingDown);
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(peer_id = %peer_id, "client request was not a websocket upgrade");
            return rejection.into_response();
        }
    };

    let registry = state.registry.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            info!(peer_id = %peer_id, "client websocket connected");
            let (sink, stream) = socket.split();
            let _ = registry.serve(peer_id, sink, stream).await;
        })
}
