//! 消息日志插件
//!
//! 观察经过路由器的每条消息并记录日志，同时统计消息吞吐

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::plugin::Plugin;
use crate::domain::{Message, PluginMetadata};

pub const LOGGER_PLUGIN_ID: &str = "logger_plugin";
/// 查询统计信息的能力
pub const MESSAGE_LOG_CAPABILITY: &str = "message_log";

/// 日志统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerStats {
    pub log_count: u64,
    /// 秒
    pub uptime: f64,
    pub messages_per_second: f64,
}

pub struct LoggerPlugin {
    log_count: AtomicU64,
    started_at: Instant,
}

impl LoggerPlugin {
    pub fn new() -> Self {
        Self {
            log_count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn stats(&self) -> LoggerStats {
        let log_count = self.log_count.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs_f64();
        let messages_per_second = if uptime > 0.0 {
            log_count as f64 / uptime
        } else {
            0.0
        };
        LoggerStats {
            log_count,
            uptime,
            messages_per_second,
        }
    }
}

impl Default for LoggerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(LOGGER_PLUGIN_ID, "Message Logger", env!("CARGO_PKG_VERSION"))
            .with_description("Logs all messages passing through the router")
            .with_capability(MESSAGE_LOG_CAPABILITY)
    }

    async fn handle_event(&self, event_type: &str, _data: &Value) -> anyhow::Result<Option<Value>> {
        match event_type {
            "stats" | "get_stats" => Ok(Some(serde_json::to_value(self.stats())?)),
            _ => Ok(None),
        }
    }

    async fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        self.log_count.fetch_add(1, Ordering::Relaxed);
        info!(
            "MCP message: {} -> {} [{}]",
            message.sender(),
            message.recipient(),
            message.msg_type()
        );
        debug!("Message content: {}", message.content());
        Ok(())
    }
}
