//! 标准化错误处理
//!
//! 定义路由器专用的错误类型，每个变体都带有稳定的错误码，
//! 供管理接口和 HTTP 层直接暴露给调用方

use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskState;

/// 路由器主要错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /// Agent ID 已被注册
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// 目标资源不存在
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Agent 不存在、未激活或没有挂载处理器
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// 插件依赖关系不满足
    #[error("Dependency error for plugin {plugin}: {reason}")]
    Dependency { plugin: String, reason: String },

    /// A2A 任务状态迁移非法
    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidState {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    /// 非目标 Agent 试图推进任务
    #[error("Agent {sender} is not the target of task {task_id}")]
    NotTaskOwner { task_id: String, sender: String },

    /// 目标 Agent 未注册或不具备 a2a 能力
    #[error("Unknown A2A agent: {0}")]
    UnknownAgent(String),

    /// 调用方设定的超时已到（消息仍在后台投递）
    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// 插件 ID 已被加载
    #[error("Plugin already loaded: {0}")]
    DuplicatePlugin(String),

    /// 插件初始化失败
    #[error("Plugin {plugin} failed to initialize: {reason}")]
    PluginInit { plugin: String, reason: String },

    /// 单个接收者投递失败
    #[error("Delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// 资源不存在的便捷构造
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RouterError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// 稳定的错误码，管理接口以此作为显式错误码返回
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::DuplicateAgent(_) => "DUPLICATE_AGENT",
            RouterError::NotFound { .. } => "NOT_FOUND",
            RouterError::AgentUnavailable(_) => "AGENT_UNAVAILABLE",
            RouterError::Dependency { .. } => "DEPENDENCY_ERROR",
            RouterError::InvalidState { .. } => "INVALID_STATE",
            RouterError::NotTaskOwner { .. } => "NOT_TASK_OWNER",
            RouterError::UnknownAgent(_) => "UNKNOWN_AGENT",
            RouterError::Timeout { .. } => "TIMEOUT",
            RouterError::DuplicatePlugin(_) => "DUPLICATE_PLUGIN",
            RouterError::PluginInit { .. } => "PLUGIN_INIT_FAILED",
            RouterError::Delivery { .. } => "DELIVERY_FAILED",
            RouterError::Config(_) => "CONFIG_ERROR",
            RouterError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<anyhow::Error> for RouterError {
    fn from(err: anyhow::Error) -> Self {
        RouterError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Internal(err.to_string())
    }
}

impl From<serde_yaml::Error> for RouterError {
    fn from(err: serde_yaml::Error) -> Self {
        RouterError::Config(err.to_string())
    }
}

/// 路由器结果类型别名
pub type Result<T> = std::result::Result<T, RouterError>;
