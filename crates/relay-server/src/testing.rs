//! In-memory transport doubles for unit tests.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use relay_core::{AdminMessage, PeerId, Target};

use crate::registry::RegistryHandle;

pub(crate) type FakeSink = UnboundedSender<Message>;
pub(crate) type FakeStream = UnboundedReceiver<Result<Message, Infallible>>;

/// The remote end of a fake transport.
pub(crate) struct FakePeer {
    /// Frames the relay wrote.
    pub(crate) written: UnboundedReceiver<Message>,
    /// Frames the peer sends to the relay.
    pub(crate) sends: UnboundedSender<Result<Message, Infallible>>,
}

impl FakePeer {
    /// Next text frame written to this peer, skipping pings.
    pub(crate) async fn next_text(&mut self) -> Option<String> {
        let wait = async {
            while let Some(frame) = self.written.next().await {
                match frame {
                    Message::Text(text) => return Some(text.to_string()),
                    Message::Close(_) => return None,
                    _ => {}
                }
            }
            None
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .ok()
            .flatten()
    }

    /// Whether nothing has been written yet.
    pub(crate) fn nothing_written(&mut self) -> bool {
        self.written.try_recv().is_err()
    }
}

pub(crate) fn fake_transport() -> (FakeSink, FakeStream, FakePeer) {
    let (sink, written) = mpsc::unbounded();
    let (sends, stream) = mpsc::unbounded();
    (sink, stream, FakePeer { written, sends })
}

pub(crate) fn peer(id: &str) -> PeerId {
    PeerId::new(id).unwrap()
}

/// Round-trip the intake so every earlier command has been applied.
pub(crate) async fn settle(registry: &RegistryHandle) {
    let _ = registry
        .deliver(AdminMessage::new(Target::Peer(peer("__settle")), ""))
        .await;
}
