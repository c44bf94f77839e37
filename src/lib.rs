//! 多 Agent 通信协议（MCP）路由器
//!
//! 提供多 Agent 协作的消息中枢：
//! - Agent 注册表（按能力查找）
//! - 插件管理（依赖约束、启用/禁用、重载）
//! - 消息路由（直接、广播、按能力）
//! - A2A 任务桥接（任务状态机、JSON-RPC 请求）
//!
//! # 架构分层
//!
//! - `domain`: 领域模型（消息、Agent、插件元数据、任务）
//! - `core`: 核心层，注册表、插件管理、消息历史和配置
//! - `protocol`: 协议层，路由器和 A2A 适配器
//! - `plugins`: 内置插件
//! - `application`: 应用层，会话桥接
//! - `infrastructure`: 基础设施层，日志和 HTTP 管理接口

pub mod domain;
pub mod errors;

// 核心层
pub mod core;

// 协议层
pub mod protocol;

// 内置插件
pub mod plugins;

// 应用层
pub mod application;

// 基础设施层
pub mod infrastructure;

pub mod bootstrap;

pub use crate::application::session::ChatBridge;
pub use crate::bootstrap::{Launcher, PluginCatalog};
pub use crate::core::config::RouterConfig;
pub use crate::core::history::HistoryView;
pub use crate::core::messaging::{
    DeliveryResult, EchoHandler, FnHandler, MessageHandler, RouteKind, RouterEvent,
};
pub use crate::core::plugin::{Plugin, PluginContext, PluginManager};
pub use crate::core::registry::AgentRegistry;
pub use crate::domain::{
    A2ATask, AgentDescriptor, AgentStatus, Artifact, Message, PluginInfo, PluginMetadata,
    Recipient, TaskState,
};
pub use crate::errors::{Result, RouterError};
pub use crate::plugins::logger::LoggerPlugin;
pub use crate::protocol::a2a::A2AAdapter;
pub use crate::protocol::router::{Router, RouterHandle};

/// 版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
