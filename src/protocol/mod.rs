//! 协议层：消息路由和 A2A 任务桥接
//!
//! 路由器负责直接、广播和能力路由；A2A 适配器以插件形式挂在路由器上

pub mod a2a;
pub mod router;
