//! Agent 注册表测试

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use mcp_router::core::registry::AgentRegistry;
use mcp_router::domain::{AgentDescriptor, AgentStatus};
use mcp_router::errors::RouterError;

#[tokio::test]
async fn test_register_then_find_round_trip() {
    common::setup();
    let registry = AgentRegistry::new();
    let id = common::generate_test_id();

    let registered = registry
        .register(AgentDescriptor::new(id.clone(), "Researcher").with_capability("search"))
        .await
        .unwrap();
    let found = registry.find(&id).await.unwrap();

    assert_eq!(found, registered);
    assert!(found.has_capability("search"));

    let err = registry
        .register(AgentDescriptor::new(id.clone(), "Again"))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::DuplicateAgent(id.clone()));
    assert_eq!(registry.find(&id).await.unwrap().name, "Researcher");
}

#[tokio::test]
async fn test_concurrent_registration_has_single_winner() {
    let registry = Arc::new(AgentRegistry::new());

    let attempts: Vec<_> = (0..16)
        .map(|n| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register(AgentDescriptor::new("contested", format!("attempt-{}", n)))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e.code(), "DUPLICATE_AGENT"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_distinct_registrations_are_not_lost() {
    let registry = Arc::new(AgentRegistry::new());

    let tasks: Vec<_> = (0..50)
        .map(|n| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register(AgentDescriptor::new(format!("agent-{}", n), "worker"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(registry.len().await, 50);
}

#[tokio::test]
async fn test_capability_lookup_follows_updates() {
    let registry = AgentRegistry::new();
    registry
        .register(AgentDescriptor::new("a", "A").with_capability("summarize"))
        .await
        .unwrap();
    registry
        .register(AgentDescriptor::new("b", "B"))
        .await
        .unwrap();

    assert_eq!(registry.capable_of("summarize").await, vec!["a".to_string()]);

    let caps: BTreeSet<String> = ["summarize".to_string()].into_iter().collect();
    registry.update_capabilities("b", caps).await.unwrap();
    assert_eq!(
        registry.capable_of("summarize").await,
        vec!["a".to_string(), "b".to_string()]
    );

    registry.set_status("a", AgentStatus::Inactive).await.unwrap();
    assert!(!registry.find("a").await.unwrap().is_active());

    registry.deregister("a").await.unwrap();
    assert_eq!(registry.capable_of("summarize").await, vec!["b".to_string()]);
    assert!(matches!(
        registry.deregister("a").await,
        Err(RouterError::NotFound { .. })
    ));
}
