//! 核心层：注册表、插件管理、消息通信和配置
//!
//! 这些组件不关心传输方式，由协议层的路由器组合在一起

pub mod config;
pub mod history;
pub mod messaging;
pub mod plugin;
pub mod registry;
