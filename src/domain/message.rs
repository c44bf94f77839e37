//! 消息领域实体
//!
//! 消息一经构造即不可变：字段私有，仅提供只读访问器

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息ID
pub type MessageId = String;

/// 广播接收者的保留字
pub const BROADCAST: &str = "broadcast";

/// 按能力寻址时接收者字段的前缀，例如 `capability:a2a`
pub const CAPABILITY_PREFIX: &str = "capability:";

/// 系统消息的发送者
pub const SYSTEM_SENDER: &str = "system";

/// 消息目标
///
/// 线上格式为单个字符串：Agent ID、`broadcast` 或 `capability:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// 指定 Agent
    Agent(String),
    /// 所有活跃 Agent
    Broadcast,
    /// 任意具备该能力的处理者
    Capability(String),
}

impl Recipient {
    /// 目标 Agent（如果是直接寻址）
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Recipient::Agent(id) => Some(id),
            _ => None,
        }
    }

    /// 目标能力（如果是按能力寻址）
    pub fn capability(&self) -> Option<&str> {
        match self {
            Recipient::Capability(cap) => Some(cap),
            _ => None,
        }
    }
}

impl From<String> for Recipient {
    fn from(raw: String) -> Self {
        if raw == BROADCAST {
            Recipient::Broadcast
        } else if let Some(cap) = raw.strip_prefix(CAPABILITY_PREFIX) {
            Recipient::Capability(cap.to_string())
        } else {
            Recipient::Agent(raw)
        }
    }
}

impl From<&str> for Recipient {
    fn from(raw: &str) -> Self {
        Recipient::from(raw.to_string())
    }
}

impl From<Recipient> for String {
    fn from(recipient: Recipient) -> Self {
        recipient.to_string()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Agent(id) => write!(f, "{}", id),
            Recipient::Broadcast => write!(f, "{}", BROADCAST),
            Recipient::Capability(cap) => write!(f, "{}{}", CAPABILITY_PREFIX, cap),
        }
    }
}

fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    id: MessageId,
    sender: String,
    recipient: Recipient,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    content: Value,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<MessageId>,
}

impl Message {
    /// 创建消息
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<Recipient>,
        msg_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: new_message_id(),
            sender: sender.into(),
            recipient: recipient.into(),
            msg_type: msg_type.into(),
            content,
            timestamp: Utc::now(),
            reply_to: None,
        }
    }

    /// 创建私聊消息
    pub fn direct(
        sender: impl Into<String>,
        to: impl Into<String>,
        msg_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self::new(sender, Recipient::Agent(to.into()), msg_type, content)
    }

    /// 创建广播消息
    pub fn broadcast(sender: impl Into<String>, msg_type: impl Into<String>, content: Value) -> Self {
        Self::new(sender, Recipient::Broadcast, msg_type, content)
    }

    /// 创建按能力寻址的消息
    pub fn to_capability(
        sender: impl Into<String>,
        capability: impl Into<String>,
        msg_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self::new(
            sender,
            Recipient::Capability(capability.into()),
            msg_type,
            content,
        )
    }

    /// 创建系统消息（用于在会话中呈现投递错误等）
    pub fn system(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self::direct(
            SYSTEM_SENDER,
            recipient,
            "system",
            Value::String(text.into()),
        )
    }

    /// 创建对本消息的回复，接收者为原发送者
    pub fn reply(&self, sender: impl Into<String>, msg_type: impl Into<String>, content: Value) -> Self {
        Self::direct(sender, self.sender.clone(), msg_type, content).with_reply_to(self.id.clone())
    }

    /// 设置回复目标（仅在构造阶段使用）
    pub fn with_reply_to(mut self, message_id: impl Into<MessageId>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// 文本内容（content 为字符串时）
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }

    /// 是否是广播消息
    pub fn is_broadcast(&self) -> bool {
        matches!(self.recipient, Recipient::Broadcast)
    }
}
