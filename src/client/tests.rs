use super::*;
use crate::config::Config;
use crate::proto::MsgRecord;
use crate::transport::MockSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

fn client_with(socket: &Arc<MockSocket>) -> MsgClient {
    MsgClient::new(socket.clone(), Config::for_test().receiver)
}

fn record(id: u64, content: &str) -> MsgRecord {
    MsgRecord {
        id,
        content: content.to_string(),
        ..Default::default()
    }
}

/// Handler forwarding every payload into a channel.
fn recorder() -> (Box<dyn MsgHandler>, mpsc::UnboundedReceiver<Arc<MsgPayload>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |payload: Arc<MsgPayload>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
        }
    };
    (Box::new(handler), rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<MsgPayload>>) -> Arc<MsgPayload> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("payload not delivered")
        .expect("handler dropped")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_repeated_register_starts_one_loop() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);

    for _ in 0..5 {
        client.register(vec![]).await.unwrap();
    }
    wait_until(|| socket.in_flight() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(socket.open_count(), 1);
    assert_eq!(socket.peak_in_flight(), 1);
    assert!(client.is_receiving().await);
    assert_eq!(client.handler_count().await, 0);
}

#[tokio::test]
async fn test_registration_is_additive() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (a, mut rx_a) = recorder();
    let (b, mut rx_b) = recorder();

    client.register(vec![a]).await.unwrap();
    client.register(vec![b]).await.unwrap();
    assert_eq!(client.handler_count().await, 2);

    socket.push(record(1, "hello world"));
    socket.push(record(2, "  <msg>hi</msg>"));

    let mut ids_a = vec![next(&mut rx_a).await.record.id, next(&mut rx_a).await.record.id];
    let mut ids_b = vec![next(&mut rx_b).await.record.id, next(&mut rx_b).await.record.id];
    ids_a.sort();
    ids_b.sort();
    assert_eq!(ids_a, vec![1, 2]);
    assert_eq!(ids_b, vec![1, 2]);
}

#[tokio::test]
async fn test_payload_carries_decoded_content() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (handler, mut rx) = recorder();
    client.register(vec![handler]).await.unwrap();

    socket.push(record(7, "  <msg>hi</msg>"));
    let payload = next(&mut rx).await;

    assert_eq!(payload.record.content, "");
    assert_eq!(payload.content_tree, Some(serde_json::json!({ "msg": "hi" })));
}

#[tokio::test]
async fn test_open_failure_aborts_registration() {
    let socket = Arc::new(MockSocket::new());
    socket.set_fail_on_open(true).await;
    let client = client_with(&socket);
    let (handler, _rx) = recorder();

    let result = client.register(vec![handler]).await;

    assert!(matches!(result, Err(ClientError::Connection(_))));
    assert!(!client.is_receiving().await);
    assert_eq!(client.handler_count().await, 0);
    assert_eq!(socket.in_flight(), 0);

    socket.set_fail_on_open(false).await;
    client.register(vec![]).await.unwrap();
    assert!(client.is_receiving().await);
    assert_eq!(socket.open_count(), 1);
}

#[tokio::test]
async fn test_destroy_without_force_refuses_while_in_use() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (handler, _rx) = recorder();
    client.register(vec![handler]).await.unwrap();

    let result = client.destroy(false).await;

    assert!(matches!(result, Err(ClientError::InUse { handlers: 1 })));
    assert!(client.is_receiving().await);
    assert_eq!(client.handler_count().await, 1);
    assert_eq!(socket.close_count(), 0);
}

#[tokio::test]
async fn test_forced_destroy_clears_state() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (handler, _rx) = recorder();
    client.register(vec![handler]).await.unwrap();

    client.destroy(true).await.unwrap();

    assert!(!client.is_receiving().await);
    assert_eq!(client.handler_count().await, 0);
    assert_eq!(socket.close_count(), 1);
}

#[tokio::test]
async fn test_destroy_without_handlers_needs_no_force() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    client.register(vec![]).await.unwrap();

    client.destroy(false).await.unwrap();

    assert!(!client.is_receiving().await);
    assert_eq!(socket.close_count(), 1);
}

#[tokio::test]
async fn test_destroy_before_open_does_not_close() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);

    client.destroy(false).await.unwrap();

    assert_eq!(socket.close_count(), 0);
}

#[tokio::test]
async fn test_destroy_reports_close_failure() {
    let socket = Arc::new(MockSocket::new());
    socket.set_fail_on_close(true).await;
    let client = client_with(&socket);
    client.register(vec![]).await.unwrap();

    let result = client.destroy(true).await;

    assert!(matches!(result, Err(ClientError::Close(_))));
    assert!(!client.is_receiving().await);
}

#[tokio::test]
async fn test_loop_exits_after_next_receive_once_destroyed() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (handler, mut rx) = recorder();
    client.register(vec![handler]).await.unwrap();
    wait_until(|| socket.in_flight() == 1).await;

    client.destroy(true).await.unwrap();
    // The blocked receive is not interrupted by the flag alone.
    assert_eq!(socket.in_flight(), 1);

    socket.push(record(1, "late"));
    wait_until(|| socket.receive_count() == 1 && socket.in_flight() == 0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(socket.in_flight(), 0);
    assert_eq!(socket.receive_count(), 1);
    // Already closed by destroy; the loop's own teardown does not close again.
    assert_eq!(socket.close_count(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_register_after_destroy_reopens() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    client.register(vec![]).await.unwrap();
    wait_until(|| socket.in_flight() == 1).await;
    client.destroy(true).await.unwrap();

    let (handler, mut rx) = recorder();
    client.register(vec![handler]).await.unwrap();
    assert_eq!(socket.open_count(), 2);

    // The first session's loop was parked in recv; only the new one remains.
    wait_until(|| socket.in_flight() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(socket.in_flight(), 1);
    assert_eq!(socket.peak_in_flight(), 1);

    socket.push(record(1, "first"));
    assert_eq!(next(&mut rx).await.record.id, 1);
    socket.push(record(2, "second"));
    assert_eq!(next(&mut rx).await.record.id, 2);
    assert!(client.is_receiving().await);
    assert_eq!(socket.close_count(), 1);
}

#[tokio::test]
async fn test_repeated_destroy_and_register_keeps_one_loop() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);

    for _ in 0..3 {
        client.register(vec![]).await.unwrap();
        wait_until(|| socket.in_flight() == 1).await;
        client.destroy(true).await.unwrap();
    }
    client.register(vec![]).await.unwrap();
    wait_until(|| socket.in_flight() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(socket.open_count(), 4);
    assert_eq!(socket.close_count(), 3);
    assert_eq!(socket.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_receive_errors_do_not_stop_loop() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let (handler, mut rx) = recorder();
    client.register(vec![handler]).await.unwrap();

    for _ in 0..5 {
        socket.push_error(TransportError::Receive("transient".to_string()));
    }
    socket.push(record(9, "after errors"));

    assert_eq!(next(&mut rx).await.record.id, 9);
    assert!(client.is_receiving().await);
    assert_eq!(socket.receive_count(), 6);
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let panicking: Box<dyn MsgHandler> = Box::new(|_payload: Arc<MsgPayload>| async move {
        panic!("handler failure");
    });
    let (handler, mut rx) = recorder();
    client.register(vec![panicking, handler]).await.unwrap();

    socket.push(record(1, "one"));
    socket.push(record(2, "two"));

    let mut ids = vec![next(&mut rx).await.record.id, next(&mut rx).await.record.id];
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert!(client.is_receiving().await);
}

/// Handler that waits for a permit on `gate` before recording completion.
fn gated(
    gate: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
) -> Box<dyn MsgHandler> {
    Box::new(move |_payload: Arc<MsgPayload>| {
        let gate = Arc::clone(&gate);
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            finished.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test]
async fn test_slow_handler_does_not_block_loop_or_peers() {
    let socket = Arc::new(MockSocket::new());
    let client = client_with(&socket);
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (fast, mut rx) = recorder();
    client
        .register(vec![gated(gate.clone(), started.clone(), finished.clone()), fast])
        .await
        .unwrap();

    for id in 1..=3 {
        socket.push(record(id, "x"));
    }

    for _ in 0..3 {
        next(&mut rx).await;
    }
    wait_until(|| socket.receive_count() == 3 && started.load(Ordering::SeqCst) == 3).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    gate.add_permits(3);
    wait_until(|| finished.load(Ordering::SeqCst) == 3).await;
}

#[tokio::test]
async fn test_dispatch_limit_bounds_running_handlers() {
    let socket = Arc::new(MockSocket::new());
    let config = ReceiverConfig {
        dispatch_limit: Some(1),
        ..Config::for_test().receiver
    };
    let client = MsgClient::new(socket.clone(), config);
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    client
        .register(vec![
            gated(gate.clone(), started.clone(), finished.clone()),
            gated(gate.clone(), started.clone(), finished.clone()),
        ])
        .await
        .unwrap();

    for id in 1..=3 {
        socket.push(record(id, "x"));
    }

    // The loop keeps receiving while handler work is held back.
    wait_until(|| socket.receive_count() == 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    gate.add_permits(6);
    wait_until(|| finished.load(Ordering::SeqCst) == 6).await;
}
