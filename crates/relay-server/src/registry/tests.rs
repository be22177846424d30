use std::convert::Infallible;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use relay_core::logging::capture_logs;
use relay_core::{AdminMessage, RelayError, Target};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use super::*;
use crate::testing::{fake_transport, peer, settle};
use crate::websocket::connection::ConnectionState;

fn test_config() -> RegistryConfig {
    RegistryConfig {
        intake_capacity: 16,
        connection: ConnectionConfig {
            queue_capacity: 8,
            write_wait: Duration::from_secs(1),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(30),
        },
    }
}

fn start(config: RegistryConfig) -> (RegistryHandle, CancellationToken) {
    let cancel = CancellationToken::new();
    let (handle, _task) = spawn_registry(config, cancel.clone());
    (handle, cancel)
}

fn to(target: &str, message: &str) -> AdminMessage {
    AdminMessage::new(Target::parse(target).unwrap(), message)
}

const HI: &str = r#"{"from":"admin","message":"hi"}"#;

#[tokio::test]
async fn register_twice_evicts_first() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, _peer1) = fake_transport();
    let first = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, _peer2) = fake_transport();
    let second = registry.serve(peer("A"), sink, stream).await;
    settle(&registry).await;

    timeout(Duration::from_secs(1), first.closed())
        .await
        .expect("evicted connection never closed");
    assert_eq!(first.state(), ConnectionState::Closed);
    assert!(second.is_open());

    settle(&registry).await;
    assert_eq!(registry.connected_peer_ids(), vec![peer("A")]);
    let current = registry.connection(&peer("A")).unwrap();
    assert!(Arc::ptr_eq(&current, &second));
}

#[tokio::test]
async fn eviction_is_logged_as_warning() {
    let (logs, _guard) = capture_logs();
    let (registry, _cancel) = start(test_config());

    let (sink, stream, _p1) = fake_transport();
    let _first = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, _p2) = fake_transport();
    let _second = registry.serve(peer("A"), sink, stream).await;
    settle(&registry).await;

    assert!(logs.has_event(Level::WARN, "replacing existing client"));
    assert_eq!(logs.matching("client registered").len(), 2);
    let evicted = logs.matching("replacing existing client");
    assert_eq!(evicted[0].field("peer_id"), Some("A"));
}

#[tokio::test]
async fn stale_unregister_keeps_reconnected_peer() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, _p1) = fake_transport();
    let first = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, _p2) = fake_transport();
    let second = registry.serve(peer("A"), sink, stream).await;
    settle(&registry).await;

    registry.unregister(&first).await;
    registry.unregister(&first).await;
    settle(&registry).await;

    let current = registry.connection(&peer("A")).unwrap();
    assert!(Arc::ptr_eq(&current, &second));
    assert_eq!(registry.connection_count(), 1);
}

#[tokio::test]
async fn wildcard_reaches_registered_peers_only() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, mut peer_a) = fake_transport();
    let _a = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, mut peer_b) = fake_transport();
    let _b = registry.serve(peer("B"), sink, stream).await;
    let (_sink_c, _stream_c, mut peer_c) = fake_transport();

    let report = registry.deliver(to("*", "hi")).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dropped, 0);
    assert!(!report.not_found);

    assert_eq!(peer_a.next_text().await.as_deref(), Some(HI));
    assert_eq!(peer_b.next_text().await.as_deref(), Some(HI));
    assert!(peer_c.nothing_written());
}

#[tokio::test]
async fn specific_target_reaches_only_that_peer() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, mut peer_a) = fake_transport();
    let _a = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, mut peer_b) = fake_transport();
    let _b = registry.serve(peer("B"), sink, stream).await;

    let report = registry.deliver(to("B", "hi")).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(peer_b.next_text().await.as_deref(), Some(HI));
    assert!(peer_a.nothing_written());
}

#[tokio::test]
async fn unknown_target_reports_not_found() {
    let (logs, _guard) = capture_logs();
    let (registry, _cancel) = start(test_config());

    let (sink, stream, _p) = fake_transport();
    let _a = registry.serve(peer("A"), sink, stream).await;

    let report = registry.deliver(to("ghost", "hi")).await.unwrap();
    assert!(report.not_found);
    assert_eq!(report.delivered, 0);
    assert_eq!(registry.connected_peer_ids(), vec![peer("A")]);
    assert!(logs.has_event(Level::WARN, "admin target not found"));
    let missed = logs.matching("admin target not found");
    assert_eq!(missed[0].field("code"), Some("TARGET_NOT_FOUND"));
}

#[tokio::test]
async fn per_peer_delivery_is_fifo() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, mut peer_a) = fake_transport();
    let _a = registry.serve(peer("A"), sink, stream).await;

    for i in 0..5 {
        registry.submit(to("A", &i.to_string())).await.unwrap();
    }
    for i in 0..5 {
        let expected = format!(r#"{{"from":"admin","message":"{i}"}}"#);
        assert_eq!(peer_a.next_text().await, Some(expected));
    }
}

#[tokio::test]
async fn saturated_peer_is_terminated_and_removed() {
    let (logs, _guard) = capture_logs();
    let mut config = test_config();
    config.connection.queue_capacity = 2;
    let (registry, _cancel) = start(config);

    // Single-slot sink nobody reads: the sender stalls on its second write.
    let (sink, _wire) = fmpsc::channel::<Message>(0);
    let (_sends, stream) = fmpsc::unbounded::<std::result::Result<Message, Infallible>>();
    let conn = registry.serve(peer("slow"), sink, stream).await;

    let mut dropped = false;
    for _ in 0..config.connection.queue_capacity + 3 {
        let report = registry.deliver(to("slow", "x")).await.unwrap();
        if report.dropped == 1 {
            dropped = true;
            break;
        }
    }

    assert!(dropped, "full queue never refused a payload");
    assert!(!conn.is_open());
    assert_eq!(registry.connection_count(), 0);

    let report = registry.deliver(to("slow", "x")).await.unwrap();
    assert!(report.not_found);

    let refused = logs.matching("client send buffer full or closed");
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].field("code"), Some("CAPACITY_EXCEEDED"));
    assert_eq!(refused[0].field("peer_id"), Some("slow"));
}

#[tokio::test]
async fn delivery_to_terminated_but_registered_peer_drops_it() {
    let (logs, _guard) = capture_logs();
    let (registry, _cancel) = start(test_config());
    let (sink, stream, _p) = fake_transport();
    let conn = registry.serve(peer("A"), sink, stream).await;
    settle(&registry).await;

    // The monitor's unregister is queued behind this delivery.
    assert!(conn.terminate());
    let report = registry.deliver(to("A", "hi")).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 1);
    assert!(!report.not_found);

    settle(&registry).await;
    assert_eq!(registry.connection_count(), 0);
    timeout(Duration::from_secs(1), conn.closed())
        .await
        .expect("terminated connection never closed");

    let refused = logs.matching("client send buffer full or closed");
    assert_eq!(refused[0].field("code"), Some("TRANSPORT_ERROR"));
    assert!(logs.has_message("stale unregister ignored"));
}

#[tokio::test]
async fn peer_disconnect_unregisters() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, peer_a) = fake_transport();
    let conn = registry.serve(peer("A"), sink, stream).await;
    settle(&registry).await;
    assert_eq!(registry.connection_count(), 1);

    drop(peer_a.sends);
    timeout(Duration::from_secs(1), conn.closed())
        .await
        .expect("connection never closed");
    settle(&registry).await;
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn close_frame_from_peer_unregisters() {
    let (registry, _cancel) = start(test_config());

    let (sink, stream, peer_a) = fake_transport();
    let conn = registry.serve(peer("A"), sink, stream).await;
    peer_a.sends.unbounded_send(Ok(Message::Close(None))).unwrap();

    timeout(Duration::from_secs(1), conn.closed())
        .await
        .expect("connection never closed");
    settle(&registry).await;
    assert!(registry.connected_peer_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_peer_times_out() {
    let mut config = test_config();
    config.connection.pong_wait = Duration::from_secs(6);
    config.connection.ping_period = Duration::from_secs(3);
    let (registry, _cancel) = start(config);

    let (sink, stream, peer_a) = fake_transport();
    let conn = registry.serve(peer("A"), sink, stream).await;

    // Activity inside the deadline keeps the connection alive.
    tokio::time::sleep(Duration::from_secs(4)).await;
    peer_a.sends.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(conn.is_open());

    timeout(Duration::from_secs(30), conn.closed())
        .await
        .expect("idle connection never closed");
    settle(&registry).await;
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn peer_list_is_sorted() {
    let (registry, _cancel) = start(test_config());
    let mut peers = Vec::new();
    for id in ["c", "a", "b"] {
        let (sink, stream, p) = fake_transport();
        let _ = registry.serve(peer(id), sink, stream).await;
        peers.push(p);
    }
    settle(&registry).await;
    assert_eq!(
        registry.connected_peer_ids(),
        vec![peer("a"), peer("b"), peer("c")]
    );
}

#[tokio::test]
async fn shutdown_drains_and_waits_for_duties() {
    let (registry, cancel) = start(test_config());

    let (sink, stream, _pa) = fake_transport();
    let a = registry.serve(peer("A"), sink, stream).await;
    let (sink, stream, _pb) = fake_transport();
    let b = registry.serve(peer("B"), sink, stream).await;
    settle(&registry).await;

    cancel.cancel();
    timeout(Duration::from_secs(5), registry.drained())
        .await
        .expect("registry never drained");

    assert!(registry.is_drained());
    assert!(a.is_closed());
    assert!(b.is_closed());
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let (registry, cancel) = start(test_config());
    cancel.cancel();
    registry.drained().await;

    assert_matches!(
        registry.submit(to("*", "hi")).await,
        Err(RelayError::ShuttingDown)
    );
    assert_matches!(
        registry.deliver(to("A", "hi")).await,
        Err(RelayError::ShuttingDown)
    );

    let (sink, stream, _p) = fake_transport();
    let late = registry.serve(peer("late"), sink, stream).await;
    timeout(Duration::from_secs(1), late.closed())
        .await
        .expect("refused connection never closed");
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn serve_after_drain_starts_no_duties() {
    let (registry, cancel) = start(test_config());
    cancel.cancel();
    registry.drained().await;

    let (sink, stream, mut p) = fake_transport();
    let late = registry.serve(peer("late"), sink, stream).await;

    assert!(late.is_closed(), "late connection outlived the drain");
    assert_eq!(p.written.next().await, Some(Message::Close(None)));
    assert_eq!(p.written.next().await, None);
    assert_eq!(registry.connection_count(), 0);
    assert!(registry.is_drained());
}

mod sequences {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use proptest::sample::Index;
    use relay_core::PeerId;
    use tokio::time::timeout;

    use super::{start, test_config};
    use crate::testing::{FakePeer, fake_transport, peer, settle};
    use crate::websocket::connection::Connection;

    const IDS: [&str; 3] = ["A", "B", "C"];

    #[derive(Clone, Debug)]
    enum Step {
        Connect(usize),
        Disconnect(Index),
        Unregister(Index),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..IDS.len()).prop_map(Step::Connect),
            any::<Index>().prop_map(Step::Disconnect),
            any::<Index>().prop_map(Step::Unregister),
        ]
    }

    /// Replay `steps` and check after each one that every id maps to the
    /// newest connection still registered under it, and that every replaced
    /// connection was terminated.
    async fn replay(steps: Vec<Step>) {
        let (registry, _cancel) = start(test_config());
        let mut served: Vec<(Arc<Connection>, FakePeer)> = Vec::new();
        let mut current: HashMap<&'static str, usize> = HashMap::new();
        let mut evicted: Vec<usize> = Vec::new();

        for step in steps {
            match step {
                Step::Connect(i) => {
                    let (sink, stream, p) = fake_transport();
                    let conn = registry.serve(peer(IDS[i]), sink, stream).await;
                    if let Some(prev) = current.insert(IDS[i], served.len()) {
                        evicted.push(prev);
                    }
                    served.push((conn, p));
                }
                Step::Disconnect(pick) => {
                    if served.is_empty() {
                        continue;
                    }
                    let k = pick.index(served.len());
                    let (conn, p) = &served[k];
                    p.sends.close_channel();
                    timeout(Duration::from_secs(1), conn.closed())
                        .await
                        .expect("disconnected peer never closed");
                    if current.get(conn.peer_id().as_str()) == Some(&k) {
                        let _ = current.remove(conn.peer_id().as_str());
                    }
                }
                Step::Unregister(pick) => {
                    if served.is_empty() {
                        continue;
                    }
                    let k = pick.index(served.len());
                    let conn = &served[k].0;
                    registry.unregister(conn).await;
                    if current.get(conn.peer_id().as_str()) == Some(&k) {
                        let _ = current.remove(conn.peer_id().as_str());
                    }
                }
            }
            settle(&registry).await;

            let mut expected: Vec<PeerId> = current.keys().map(|id| peer(id)).collect();
            expected.sort();
            assert_eq!(registry.connected_peer_ids(), expected);
            for (id, &k) in &current {
                let live = registry.connection(&peer(id)).expect("id not registered");
                assert!(Arc::ptr_eq(&live, &served[k].0), "{id} maps to a stale connection");
                assert!(live.is_open());
            }
            for &k in &evicted {
                assert!(!served[k].0.is_open(), "replaced connection still open");
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn every_id_tracks_its_newest_connection(
            steps in proptest::collection::vec(step(), 1..24),
        ) {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(replay(steps));
        }
    }
}
