//! A2A 任务领域实体
//!
//! 任务状态机：
//!
//! ```text
//! SUBMITTED ──► WORKING ──► COMPLETED
//!     │            ├──────► FAILED
//!     └────────────┴──────► CANCELED
//! ```
//!
//! 终态不接受任何迁移；被拒绝的迁移不会修改任务

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, RouterError};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Submitted,
    Working,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// 状态机是否允许 `self -> next`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Working)
                | (Working, Completed)
                | (Working, Failed)
                | (Submitted, Canceled)
                | (Working, Canceled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "SUBMITTED",
            TaskState::Working => "WORKING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Canceled => "CANCELED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUBMITTED" => Ok(TaskState::Submitted),
            "WORKING" => Ok(TaskState::Working),
            "COMPLETED" => Ok(TaskState::Completed),
            "FAILED" => Ok(TaskState::Failed),
            "CANCELED" | "CANCELLED" => Ok(TaskState::Canceled),
            _ => Err(format!("unknown task state: {}", s)),
        }
    }
}

/// 任务产出物
///
/// 适配器只负责搬运，不解释内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    Text {
        value: String,
    },
    File {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Data {
        value: Value,
    },
}

impl Artifact {
    pub fn text(value: impl Into<String>) -> Self {
        Artifact::Text {
            value: value.into(),
        }
    }

    pub fn file(uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Artifact::File {
            uri: uri.into(),
            mime_type,
            name: None,
        }
    }

    pub fn data(value: Value) -> Self {
        Artifact::Data { value }
    }
}

/// A2A 任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2ATask {
    pub id: String,
    pub target_agent: String,
    pub input: Vec<Artifact>,
    pub state: TaskState,
    pub output: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl A2ATask {
    /// 创建处于 SUBMITTED 状态的任务
    pub fn new(target_agent: impl Into<String>, input: Vec<Artifact>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_agent: target_agent.into(),
            input,
            state: TaskState::Submitted,
            output: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 校验并执行状态迁移
    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RouterError::InvalidState {
                task_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// WORKING -> COMPLETED，并附带产出物
    pub fn complete(&mut self, output: Vec<Artifact>) -> Result<()> {
        self.transition(TaskState::Completed)?;
        self.output = output;
        Ok(())
    }

    /// WORKING -> FAILED，并附带错误详情
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}
