//! 消息路由器测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FailingHandler, RecordingHandler, TestPlugin};
use mcp_router::core::messaging::{EchoHandler, RouteKind, RouterEvent};
use mcp_router::domain::{AgentDescriptor, AgentStatus, Message};
use mcp_router::errors::RouterError;
use mcp_router::protocol::router::Router;

async fn register_recorder(router: &Router, id: &str) -> RecordingHandler {
    let recorder = RecordingHandler::new();
    router
        .register_agent(AgentDescriptor::new(id, id), Some(Arc::new(recorder.clone())))
        .await
        .unwrap();
    recorder
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    common::setup();
    let router = Router::default();
    let inbox = RecordingHandler::new().with_delay(Duration::from_millis(1));
    router
        .register_agent(
            AgentDescriptor::new("inbox", "Inbox"),
            Some(Arc::new(inbox.clone())),
        )
        .await
        .unwrap();

    let senders: Vec<_> = ["s1", "s2", "s3"]
        .into_iter()
        .map(|sender| {
            let router = router.clone();
            tokio::spawn(async move {
                for seq in 0..20 {
                    router
                        .send(Message::direct(sender, "inbox", "seq", json!(seq)))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        common::with_timeout(common::TEST_TIMEOUT_SHORT, sender)
            .await
            .unwrap();
    }

    let received = inbox.received();
    assert_eq!(received.len(), 60);
    for sender in ["s1", "s2", "s3"] {
        let seqs: Vec<i64> = received
            .iter()
            .filter(|m| m.sender() == sender)
            .filter_map(|m| m.content().as_i64())
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<i64>>());
    }
}

#[tokio::test]
async fn test_broadcast_collects_partial_failures() {
    let router = Router::default();
    let a = register_recorder(&router, "a").await;
    let b = register_recorder(&router, "b").await;
    let c = register_recorder(&router, "c").await;
    router
        .register_agent(
            AgentDescriptor::new("broken", "Broken"),
            Some(Arc::new(FailingHandler)),
        )
        .await
        .unwrap();

    let result = router
        .send(Message::broadcast("announcer", "notice", json!("standup")))
        .await
        .unwrap();

    assert_eq!(result.route, RouteKind::Broadcast);
    assert_eq!(result.delivered.len(), 3);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].recipient, "broken");
    assert_eq!(result.failures[0].code, "DELIVERY_FAILED");
    for recorder in [&a, &b, &c] {
        assert_eq!(recorder.count(), 1);
    }
}

#[tokio::test]
async fn test_broadcast_skips_sender_and_inactive_agents() {
    let router = Router::default();
    let sender = register_recorder(&router, "sender").await;
    let sleeper = register_recorder(&router, "sleeper").await;
    let awake = register_recorder(&router, "awake").await;
    router
        .register_agent(AgentDescriptor::new("mute", "No handler"), None)
        .await
        .unwrap();
    router
        .registry()
        .set_status("sleeper", AgentStatus::Inactive)
        .await
        .unwrap();

    let result = router
        .send(Message::broadcast("sender", "notice", json!("hello")))
        .await
        .unwrap();

    assert_eq!(result.recipients(), vec!["awake"]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].code, "AGENT_UNAVAILABLE");
    assert_eq!(sender.count(), 0);
    assert_eq!(sleeper.count(), 0);
    assert_eq!(awake.count(), 1);
}

#[tokio::test]
async fn test_history_evicts_oldest() {
    let router = Router::new(3);
    register_recorder(&router, "r").await;

    for n in 0..4 {
        router
            .send(Message::direct("s", "r", "seq", json!(n)))
            .await
            .unwrap();
    }

    let history = router.history(10).await;
    let chronological: Vec<_> = history.chronological().map(|m| m.content().clone()).collect();
    assert_eq!(chronological, vec![json!(1), json!(2), json!(3)]);

    let newest_first: Vec<_> = history.iter().map(|m| m.content().clone()).collect();
    assert_eq!(newest_first, vec![json!(3), json!(2), json!(1)]);
}

#[tokio::test]
async fn test_capability_prefers_plugins() {
    let router = Router::default();
    let agent = RecordingHandler::new();
    router
        .register_agent(
            AgentDescriptor::new("translator", "Translator").with_capability("translate"),
            Some(Arc::new(agent.clone())),
        )
        .await
        .unwrap();
    router
        .plugins()
        .load(
            TestPlugin::new("dictionary")
                .provides("translate")
                .responds(json!("bonjour"))
                .arc(),
        )
        .await
        .unwrap();

    let result = router
        .send(Message::to_capability("user:1", "translate", "translate", json!("hello")))
        .await
        .unwrap();

    assert_eq!(result.route, RouteKind::Capability);
    assert_eq!(result.recipients(), vec!["dictionary"]);
    let reply = result.first_reply().unwrap();
    assert_eq!(reply.sender(), "dictionary");
    assert_eq!(reply.text(), Some("bonjour"));
    assert_eq!(agent.count(), 0);
}

#[tokio::test]
async fn test_capability_falls_back_to_first_accepting_agent() {
    let router = Router::default();
    router
        .register_agent(
            AgentDescriptor::new("flaky", "Flaky").with_capability("summarize"),
            Some(Arc::new(FailingHandler)),
        )
        .await
        .unwrap();
    router
        .register_agent(
            AgentDescriptor::new("steady", "Steady").with_capability("summarize"),
            Some(Arc::new(EchoHandler::new("steady"))),
        )
        .await
        .unwrap();
    let backup = RecordingHandler::new();
    router
        .register_agent(
            AgentDescriptor::new("backup", "Backup").with_capability("summarize"),
            Some(Arc::new(backup.clone())),
        )
        .await
        .unwrap();

    let result = router
        .send(Message::to_capability("user:1", "summarize", "chat", json!("long text")))
        .await
        .unwrap();

    assert_eq!(result.recipients(), vec!["steady"]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].recipient, "flaky");
    assert_eq!(result.first_reply().unwrap().sender(), "steady");
    assert_eq!(backup.count(), 0);

    let err = router
        .send(Message::to_capability("user:1", "juggle", "chat", json!(null)))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::AgentUnavailable("capability:juggle".to_string()));
}

#[tokio::test]
async fn test_send_with_timeout_keeps_delivering() {
    let router = Router::default();
    let slow = RecordingHandler::new().with_delay(Duration::from_millis(300));
    router
        .register_agent(AgentDescriptor::new("slow", "Slow"), Some(Arc::new(slow.clone())))
        .await
        .unwrap();

    let err = router
        .send_with_timeout(
            Message::direct("user:1", "slow", "chat", json!("ping")),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");
    assert_eq!(slow.count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(slow.count(), 1);
}

#[tokio::test]
async fn test_direct_delivery_errors() {
    let router = Router::default();
    router
        .register_agent(AgentDescriptor::new("broken", "Broken"), Some(Arc::new(FailingHandler)))
        .await
        .unwrap();
    register_recorder(&router, "gone").await;
    router.deregister_agent("gone").await.unwrap();

    let err = router
        .send(Message::direct("u", "broken", "chat", json!(null)))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Delivery { ref recipient, .. } if recipient == "broken"));

    let err = router
        .send(Message::direct("u", "gone", "chat", json!(null)))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::AgentUnavailable("gone".to_string()));

    assert!(matches!(
        router.attach_handler("gone", Arc::new(FailingHandler)).await,
        Err(RouterError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_subscribers_observe_events() {
    let router = Router::default();
    let mut events = router.subscribe();

    register_recorder(&router, "watcher").await;
    router
        .send(Message::direct("u", "watcher", "chat", json!("hi")))
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        RouterEvent::AgentRegistered { agent } => assert_eq!(agent.id, "watcher"),
        other => panic!("unexpected event: {:?}", other),
    }
    match events.recv().await.unwrap() {
        RouterEvent::MessageRecorded { message } => assert_eq!(message.text(), Some("hi")),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_idle_lanes_are_reclaimed() {
    let router = Router::default();
    router
        .register_agent(
            AgentDescriptor::new("echo", "Echo"),
            Some(Arc::new(EchoHandler::new("echo"))),
        )
        .await
        .unwrap();

    for session in 0..500 {
        router
            .send(Message::direct(
                format!("user:{}", session),
                "echo",
                "chat",
                json!("hi"),
            ))
            .await
            .unwrap();
    }
    assert_eq!(router.active_lanes(), 0);
    assert_eq!(router.history_len().await, 500);

    // 并发投递期间通道存在，全部结束后回收
    let slow = RecordingHandler::new().with_delay(Duration::from_millis(50));
    router
        .register_agent(AgentDescriptor::new("slow", "Slow"), Some(Arc::new(slow.clone())))
        .await
        .unwrap();
    let sends: Vec<_> = (0..10)
        .map(|n| {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .send(Message::direct("user:burst", "slow", "seq", json!(n)))
                    .await
                    .unwrap();
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(router.active_lanes(), 1);
    for send in sends {
        common::with_timeout(common::TEST_TIMEOUT_SHORT, send)
            .await
            .unwrap();
    }
    assert_eq!(slow.count(), 10);
    assert_eq!(router.active_lanes(), 0);
}
