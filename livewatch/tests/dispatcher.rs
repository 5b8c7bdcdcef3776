//! Dispatcher behavior against a live OneBot endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use onebot::{Endpoint, MessageBody, Target};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use common::{OneBotServer, Reply, ServerOptions};
use livewatch::dispatcher::{BindingRoute, BindingSpec, Dispatcher, DispatcherConfig, OutboundMessage};
use livewatch::domain::{BindingStatus, ConnectionState, DeliveryResult};
use livewatch::notification::MessageSink;
use livewatch::store::{MemoryStore, StatusSink};

fn config() -> DispatcherConfig {
    DispatcherConfig {
        queue_capacity: 8,
        ack_timeout: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(100),
        ping_interval: Duration::from_secs(20),
    }
}

fn spec(binding_id: &str, url: &str) -> BindingSpec {
    BindingSpec {
        binding_id: binding_id.to_string(),
        creator_id: "c1".to_string(),
        route: Ok(BindingRoute {
            endpoint: Endpoint::parse(url, Some("secret")).unwrap(),
            target: Target::Group(123),
        }),
    }
}

fn text(s: &str) -> MessageBody {
    MessageBody::Text(s.to_string())
}

async fn wait_for_status(
    dispatcher: &Dispatcher,
    binding_id: &str,
    predicate: impl Fn(&BindingStatus) -> bool,
) -> BindingStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(status) = dispatcher.status(binding_id)
            && predicate(&status)
        {
            return status;
        }
        assert!(tokio::time::Instant::now() < deadline, "status condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn acknowledged_message_updates_last_success() {
    let mut server = OneBotServer::spawn(ServerOptions::default()).await;
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(config(), store.clone(), CancellationToken::new());
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;

    let result = dispatcher
        .send_and_wait("b1", text("hello"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, DeliveryResult::Acknowledged);

    let frame = server.next().await;
    assert_eq!(frame.action, "send_group_msg");
    assert_eq!(frame.params["group_id"], 123);
    assert_eq!(frame.text(), "hello");
    assert!(!frame.echo.is_empty());

    let status = dispatcher.status("b1").unwrap();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert!(status.last_success_at.is_some());
    assert_eq!(status.last_attempt.unwrap().echo, frame.echo);

    let persisted = store.get_binding_status("b1").await.unwrap().unwrap();
    assert!(persisted.last_success_at.is_some());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn rejected_message_is_a_failure() {
    let server = OneBotServer::spawn(ServerOptions {
        reply: Reply::Reject,
        ..Default::default()
    })
    .await;
    let dispatcher = Dispatcher::new(config(), Arc::new(MemoryStore::new()), CancellationToken::new());
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;

    let result = dispatcher
        .send_and_wait("b1", text("hello"), Duration::from_secs(5))
        .await
        .unwrap();
    let DeliveryResult::Rejected { reason } = result else {
        panic!("expected rejection, got {:?}", result);
    };
    assert!(reason.contains("no permission"));

    let status = dispatcher.status("b1").unwrap();
    assert!(status.last_success_at.is_none());
    assert!(status.last_error.unwrap().contains("retcode 100"));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn missing_acknowledgment_times_out() {
    let mut server = OneBotServer::spawn(ServerOptions {
        reply: Reply::Silent,
        ..Default::default()
    })
    .await;
    let dispatcher = Dispatcher::new(config(), Arc::new(MemoryStore::new()), CancellationToken::new());
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;

    let result = dispatcher
        .send_and_wait("b1", text("anyone?"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, DeliveryResult::AckTimeout);
    server.next().await;

    // The timeout is recorded but the connection stays up.
    let status = dispatcher.status("b1").unwrap();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(status.last_error.as_deref(), Some("acknowledgment timed out"));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn messages_keep_order_across_reconnect() {
    let mut server = OneBotServer::spawn(ServerOptions {
        close_first_after: Some(1),
        ..Default::default()
    })
    .await;
    let dispatcher = Dispatcher::new(config(), Arc::new(MemoryStore::new()), CancellationToken::new());
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;

    let result = dispatcher
        .send_and_wait("b1", text("A"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, DeliveryResult::Acknowledged);

    wait_for_status(&dispatcher, "b1", |s| s.connection != ConnectionState::Connected).await;
    dispatcher.submit("b1", OutboundMessage::new(text("B"), None)).unwrap();
    dispatcher.submit("b1", OutboundMessage::new(text("C"), None)).unwrap();

    let frames = server.take(3).await;
    let texts: Vec<String> = frames.iter().map(|f| f.text()).collect();
    assert_eq!(texts, vec!["A", "B", "C"]);
    assert_eq!(frames[0].connection, 1);
    assert_eq!(frames[1].connection, 2);
    assert_eq!(frames[2].connection, 2);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn queue_overflow_keeps_newest_messages() {
    let (release, gate) = oneshot::channel();
    let mut server = OneBotServer::spawn(ServerOptions {
        gate: Some(gate),
        ..Default::default()
    })
    .await;
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            queue_capacity: 2,
            ..config()
        },
        Arc::new(MemoryStore::new()),
        CancellationToken::new(),
    );
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;

    for body in ["m1", "m2", "m3", "m4"] {
        dispatcher.submit("b1", OutboundMessage::new(text(body), None)).unwrap();
    }
    let status = wait_for_status(&dispatcher, "b1", |s| s.dropped_total == 2).await;
    assert_eq!(status.queued, 2);
    assert_ne!(status.connection, ConnectionState::Connected);

    release.send(()).unwrap();
    let texts: Vec<String> = server.take(2).await.iter().map(|f| f.text()).collect();
    assert_eq!(texts, vec!["m3", "m4"]);
    assert!(server.is_quiet(Duration::from_millis(200)).await);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn removed_binding_rejects_submissions() {
    let server = OneBotServer::spawn(ServerOptions::default()).await;
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(config(), store.clone(), CancellationToken::new());
    dispatcher
        .reconcile(vec![spec("b1", &server.url), spec("b2", &server.url)])
        .await;
    wait_for_status(&dispatcher, "b1", |s| s.connection == ConnectionState::Connected).await;

    let report = dispatcher.reconcile(vec![spec("b2", &server.url)]).await;
    assert_eq!(report.stopped, 1);
    assert!(dispatcher.submit("b1", OutboundMessage::new(text("late"), None)).is_err());
    assert!(store.get_binding_status("b1").await.unwrap().is_none());

    let result = dispatcher
        .send_and_wait("b2", text("still here"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(result.is_success());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn stalled_reader_drops_oldest_and_reconnects() {
    let server = OneBotServer::spawn(ServerOptions {
        stall: true,
        ..Default::default()
    })
    .await;
    let dispatcher = Dispatcher::new(config(), Arc::new(MemoryStore::new()), CancellationToken::new());
    dispatcher.reconcile(vec![spec("b1", &server.url)]).await;
    wait_for_status(&dispatcher, "b1", |s| s.connection == ConnectionState::Connected).await;

    // Large frames fill the socket buffers quickly once the peer stops reading.
    let payload = "x".repeat(1024 * 1024);
    for _ in 0..48 {
        dispatcher
            .submit("b1", OutboundMessage::new(text(&payload), None))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = wait_for_status(&dispatcher, "b1", |s| {
        s.dropped_total > 0
            && s.last_error.as_deref().is_some_and(|e| e.contains("timed out"))
    })
    .await;
    assert!(status.queued <= 8);

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown blocked on a stalled endpoint");
}
