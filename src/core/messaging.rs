//! 消息通信层
//!
//! 定义消息处理器接口、投递结果以及供审计/持久化订阅的路由事件

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::domain::{AgentDescriptor, Message};
use crate::errors::RouterError;

/// 消息处理 trait
///
/// 处理器可以阻塞（例如调用外部服务），路由器调用时不持有内部锁。
/// 返回 `Some(reply)` 表示同步回复
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Message>>;
}

/// 基于闭包的消息处理器
pub struct FnHandler {
    callback: Box<dyn Fn(&Message) -> anyhow::Result<Option<Message>> + Send + Sync>,
}

impl FnHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Message) -> anyhow::Result<Option<Message>> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl MessageHandler for FnHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        (self.callback)(message)
    }
}

/// 回显处理器：把收到的内容原样回复给发送者
pub struct EchoHandler {
    agent_id: String,
}

impl EchoHandler {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        // 不回复广播，避免回声风暴
        if message.is_broadcast() {
            return Ok(None);
        }
        debug!("Echo agent {} replying to {}", self.agent_id, message.sender());
        Ok(Some(message.reply(
            self.agent_id.clone(),
            message.msg_type(),
            message.content().clone(),
        )))
    }
}

/// 路由方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Direct,
    Broadcast,
    Capability,
}

/// 单个接收者的成功投递
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Message>,
}

/// 单个接收者的投递失败
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub code: String,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn from_error(recipient: impl Into<String>, error: &RouterError) -> Self {
        Self {
            recipient: recipient.into(),
            code: error.code().to_string(),
            reason: error.to_string(),
        }
    }
}

/// 投递结果
///
/// 广播时部分失败被收集在 `failures` 中而不是作为错误抛出
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub message_id: String,
    pub route: RouteKind,
    pub delivered: Vec<Delivery>,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryResult {
    pub fn new(message_id: impl Into<String>, route: RouteKind) -> Self {
        Self {
            message_id: message_id.into(),
            route,
            delivered: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// 没有任何失败
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 成功投递的接收者
    pub fn recipients(&self) -> Vec<&str> {
        self.delivered.iter().map(|d| d.recipient.as_str()).collect()
    }

    /// 所有同步回复
    pub fn replies(&self) -> impl Iterator<Item = &Message> {
        self.delivered.iter().filter_map(|d| d.reply.as_ref())
    }

    /// 第一条同步回复
    pub fn first_reply(&self) -> Option<&Message> {
        self.replies().next()
    }
}

/// 路由事件
///
/// 通过 `Router::subscribe` 提供给审计、持久化等只读观察者
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    MessageRecorded { message: Message },
    AgentRegistered { agent: AgentDescriptor },
    AgentDeregistered { agent_id: String },
    PluginLoaded { plugin_id: String },
    PluginEnabled { plugin_id: String },
    PluginDisabled { plugin_id: String },
    PluginReloaded { plugin_id: String, success: bool },
    PluginUnloaded { plugin_id: String },
}
