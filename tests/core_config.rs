//! 配置加载测试

mod common;

use std::io::Write;
use std::sync::Arc;

use common::TestPlugin;
use mcp_router::bootstrap::{Launcher, PluginCatalog};
use mcp_router::core::config::RouterConfig;
use mcp_router::core::plugin::Plugin;
use mcp_router::plugins::logger::LOGGER_PLUGIN_ID;
use mcp_router::protocol::a2a::{A2AAdapter, A2A_PLUGIN_ID};

const SAMPLE: &str = r#"
bind: "127.0.0.1:0"
history_capacity: 25
task_retention_secs: 30
agents:
  - id: echo
    name: Echo Agent
    capabilities: [chat]
    echo: true
  - id: research_a2a
    capabilities: [a2a, search]
plugins:
  - id: a2a_adapter
  - id: not_in_catalog
"#;

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = RouterConfig::from_file(file.path()).unwrap();
    assert_eq!(config.history_capacity, 25);
    assert_eq!(config.task_retention_secs, 30);
    assert_eq!(config.gc_interval_secs, 60);
    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents[0].name.as_deref(), Some("Echo Agent"));
    assert!(config.agents[1].to_descriptor().has_capability("a2a"));
    assert_eq!(config.plugins[0].id, A2A_PLUGIN_ID);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RouterConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
}

#[test]
fn test_catalog_builtins() {
    let catalog = PluginCatalog::builtin();
    assert!(catalog.contains(LOGGER_PLUGIN_ID));
    let plugin = catalog
        .create(LOGGER_PLUGIN_ID, &RouterConfig::default())
        .unwrap();
    assert_eq!(plugin.metadata().id, LOGGER_PLUGIN_ID);
    assert!(PluginCatalog::empty().create(LOGGER_PLUGIN_ID, &RouterConfig::default()).is_none());
}

#[test]
fn test_catalog_rejects_adapter_override() {
    let mut catalog = PluginCatalog::builtin();
    let accepted = catalog.register(A2A_PLUGIN_ID, |config: &RouterConfig| {
        A2AAdapter::new(config.task_retention()) as Arc<dyn Plugin>
    });
    assert!(!accepted);
    assert!(!catalog.contains(A2A_PLUGIN_ID));
}

fn layered_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::empty();
    catalog.register("base", |_: &RouterConfig| TestPlugin::new("base").arc() as Arc<dyn Plugin>);
    catalog.register("mid", |_: &RouterConfig| {
        TestPlugin::new("mid").depends_on("base").arc() as Arc<dyn Plugin>
    });
    catalog.register("top", |_: &RouterConfig| {
        TestPlugin::new("top").depends_on("mid").arc() as Arc<dyn Plugin>
    });
    catalog.register("loner", |_: &RouterConfig| TestPlugin::new("loner").arc() as Arc<dyn Plugin>);
    catalog
}

#[tokio::test]
async fn test_plugins_load_in_dependency_order() {
    common::setup();
    let config = RouterConfig::from_yaml(
        r#"
plugins:
  - id: top
  - id: loner
  - id: mid
  - id: base
"#,
    )
    .unwrap();
    let runtime = Launcher::with_config(config)
        .with_catalog(layered_catalog())
        .build()
        .await
        .unwrap();

    let loaded: Vec<String> = runtime
        .router
        .plugins()
        .list()
        .await
        .into_iter()
        .map(|info| info.metadata.id)
        .collect();
    assert_eq!(loaded, vec!["loner", "base", "mid", "top"]);
    for id in &loaded {
        assert!(runtime.router.plugins().is_enabled(id).await);
    }
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_circular_plugin_dependencies_are_config_error() {
    let mut catalog = PluginCatalog::empty();
    catalog.register("ping", |_: &RouterConfig| {
        TestPlugin::new("ping").depends_on("pong").arc() as Arc<dyn Plugin>
    });
    catalog.register("pong", |_: &RouterConfig| {
        TestPlugin::new("pong").depends_on("ping").arc() as Arc<dyn Plugin>
    });
    let config = RouterConfig::from_yaml(
        r#"
plugins:
  - id: ping
  - id: pong
"#,
    )
    .unwrap();

    let err = match Launcher::with_config(config).with_catalog(catalog).build().await {
        Ok(_) => panic!("cycle should be rejected"),
        Err(e) => e,
    };
    let err = err.downcast::<mcp_router::RouterError>().unwrap();
    assert_eq!(err.code(), "CONFIG_ERROR");
}

#[tokio::test]
async fn test_launcher_builds_runtime_from_config() {
    let config = RouterConfig::from_yaml(SAMPLE).unwrap();
    let runtime = Launcher::with_config(config).build().await.unwrap();

    let registry = runtime.router.registry();
    assert!(registry.contains("echo").await);
    assert!(registry.contains("research_a2a").await);
    assert!(registry.contains(A2A_PLUGIN_ID).await);

    let plugins = runtime.router.plugins().list().await;
    assert_eq!(plugins.len(), 1);
    assert!(plugins[0].enabled);

    let adapter = runtime.a2a.clone().unwrap();
    let task_id = adapter.create_task("research_a2a", vec![]).await.unwrap();
    assert!(adapter.get_task(&task_id).await.is_ok());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_disabled_plugin_declaration() {
    let config = RouterConfig::from_yaml(
        r#"
plugins:
  - id: a2a_adapter
    enabled: false
"#,
    )
    .unwrap();
    let runtime = Launcher::with_config(config).build().await.unwrap();
    assert!(!runtime.router.plugins().is_enabled(A2A_PLUGIN_ID).await);
    runtime.shutdown().await;
}
