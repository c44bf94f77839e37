//! 测试通用工具
//!
//! 提供测试辅助函数、记录型处理器和可配置的测试插件

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mcp_router::core::messaging::MessageHandler;
use mcp_router::core::plugin::{Plugin, PluginContext};
use mcp_router::domain::{Message, PluginMetadata};

static INIT: Once = Once::new();

/// 初始化测试环境
pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// 生成唯一的测试 ID
pub fn generate_test_id() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

/// 测试超时包装器
pub async fn with_timeout<F, T>(duration: Duration, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, f)
        .await
        .expect("Test timed out")
}

pub const TEST_TIMEOUT_SHORT: Duration = Duration::from_secs(5);

/// 记录收到的消息，可选地在处理时延迟
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<Message>>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每条消息处理前等待一段时间
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.received.lock().unwrap().push(message.clone());
        Ok(None)
    }
}

/// 总是失败的处理器
pub struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _message: &Message) -> anyhow::Result<Option<Message>> {
        anyhow::bail!("handler exploded")
    }
}

/// 可配置的测试插件
pub struct TestPlugin {
    metadata: PluginMetadata,
    response: Option<Value>,
    fail_init: AtomicBool,
    fail_events: bool,
    pub init_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub events: AtomicUsize,
    pub observed: AtomicUsize,
}

impl TestPlugin {
    pub fn new(id: &str) -> Self {
        Self {
            metadata: PluginMetadata::new(id, id, "1.0.0"),
            response: None,
            fail_init: AtomicBool::new(false),
            fail_events: false,
            init_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            events: AtomicUsize::new(0),
            observed: AtomicUsize::new(0),
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.metadata = self.metadata.with_dependency(dependency);
        self
    }

    pub fn provides(mut self, capability: &str) -> Self {
        self.metadata = self.metadata.with_capability(capability);
        self
    }

    /// 对每个事件都返回该响应
    pub fn responds(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn failing_init(self) -> Self {
        self.fail_init.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_events(mut self) -> Self {
        self.fail_events = true;
        self
    }

    /// 切换后续初始化是否失败（用于重载测试）
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    async fn initialize(&self, _context: PluginContext) -> anyhow::Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("init failed for {}", self.metadata.id);
        }
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_event(&self, _event_type: &str, _data: &Value) -> anyhow::Result<Option<Value>> {
        self.events.fetch_add(1, Ordering::SeqCst);
        if self.fail_events {
            anyhow::bail!("event failed in {}", self.metadata.id);
        }
        Ok(self.response.clone())
    }

    async fn on_message(&self, _message: &Message) -> anyhow::Result<()> {
        self.observed.fetch_add(1, Ordering::SeqCst);
        if self.fail_events {
            anyhow::bail!("observer failed in {}", self.metadata.id);
        }
        Ok(())
    }
}
