//! 会话桥接测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FailingHandler, RecordingHandler};
use mcp_router::application::session::{session_sender, ChatBridge};
use mcp_router::core::messaging::EchoHandler;
use mcp_router::domain::{AgentDescriptor, SYSTEM_SENDER};
use mcp_router::protocol::router::Router;

async fn router_with_agents() -> Router {
    common::setup();
    let router = Router::default();
    router
        .register_agent(
            AgentDescriptor::new("echo", "Echo"),
            Some(Arc::new(EchoHandler::new("echo"))),
        )
        .await
        .unwrap();
    router
        .register_agent(AgentDescriptor::new("broken", "Broken"), Some(Arc::new(FailingHandler)))
        .await
        .unwrap();
    router
}

#[tokio::test]
async fn test_ask_returns_agent_reply() {
    let router = router_with_agents().await;
    let bridge = ChatBridge::new(router.clone());

    let reply = bridge.ask("s1", "echo", "hello there").await;
    assert_eq!(reply.sender(), "echo");
    assert_eq!(reply.text(), Some("hello there"));
    assert_eq!(reply.recipient().agent_id(), Some("user:s1"));

    let sent = router.history(1).await;
    let sent = sent.iter().next().unwrap();
    assert_eq!(sent.sender(), session_sender("s1"));
    assert_eq!(sent.msg_type(), "chat");
}

#[tokio::test]
async fn test_delivery_errors_become_system_messages() {
    let router = router_with_agents().await;
    let bridge = ChatBridge::new(router);

    let reply = bridge.ask("s1", "broken", "are you there?").await;
    assert_eq!(reply.sender(), SYSTEM_SENDER);
    assert_eq!(reply.msg_type(), "system");
    assert!(reply.text().unwrap().contains("handler exploded"));

    let reply = bridge.ask("s1", "nobody", "hello?").await;
    assert_eq!(reply.sender(), SYSTEM_SENDER);
    assert!(reply.text().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_silent_agent_and_timeout() {
    let router = router_with_agents().await;
    router
        .register_agent(
            AgentDescriptor::new("quiet", "Quiet"),
            Some(Arc::new(RecordingHandler::new())),
        )
        .await
        .unwrap();
    router
        .register_agent(
            AgentDescriptor::new("slow", "Slow"),
            Some(Arc::new(
                RecordingHandler::new().with_delay(Duration::from_millis(300)),
            )),
        )
        .await
        .unwrap();

    let bridge = ChatBridge::new(router).with_timeout(Duration::from_millis(50));

    let reply = bridge.ask("s2", "quiet", "psst").await;
    assert_eq!(reply.sender(), SYSTEM_SENDER);
    assert!(reply.text().unwrap().contains("did not reply"));

    let reply = bridge.ask("s2", "slow", "hurry").await;
    assert_eq!(reply.sender(), SYSTEM_SENDER);
    assert!(reply.text().unwrap().contains("timed out"));

    let transcript = bridge.transcript("s2", 10).await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].text(), Some("hurry"));
}
