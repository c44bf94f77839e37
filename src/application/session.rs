//! 会话桥接
//!
//! 把人类会话的输入转换为路由器消息。会话路径上的投递错误以系统消息的形式
//! 返回，而不是中断会话

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::Message;
use crate::protocol::router::Router;

/// 会话消息类型
pub const CHAT_MESSAGE_TYPE: &str = "chat";

/// 会话参与者的发送者 ID
pub fn session_sender(session_id: &str) -> String {
    format!("user:{}", session_id)
}

/// 会话桥
#[derive(Clone)]
pub struct ChatBridge {
    router: Router,
    timeout: Option<Duration>,
}

impl ChatBridge {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            timeout: None,
        }
    }

    /// 每次提问的等待上限
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 向 Agent 提问，返回 Agent 的回复或描述失败原因的系统消息
    pub async fn ask(&self, session_id: &str, agent_id: &str, text: &str) -> Message {
        let sender = session_sender(session_id);
        let message = Message::direct(
            sender.clone(),
            agent_id,
            CHAT_MESSAGE_TYPE,
            Value::String(text.to_string()),
        );

        let result = match self.timeout {
            Some(timeout) => self.router.send_with_timeout(message, timeout).await,
            None => self.router.send(message).await,
        };

        match result {
            Ok(result) => match result.first_reply() {
                Some(reply) => reply.clone(),
                None => {
                    debug!("Agent {} did not reply to session {}", agent_id, session_id);
                    Message::system(sender, format!("{} received the message but did not reply", agent_id))
                }
            },
            Err(e) => {
                warn!("Chat delivery to {} failed: {}", agent_id, e);
                Message::system(sender, format!("Delivery to {} failed: {}", agent_id, e))
            }
        }
    }

    /// 会话相关的最近消息（从新到旧）
    pub async fn transcript(&self, session_id: &str, limit: usize) -> Vec<Message> {
        let participant = session_sender(session_id);
        self.router
            .history(usize::MAX)
            .await
            .iter()
            .filter(|m| {
                m.sender() == participant
                    || m.recipient().agent_id() == Some(participant.as_str())
            })
            .take(limit)
            .cloned()
            .collect()
    }
}
