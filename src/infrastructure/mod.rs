//! 基础设施层：日志和 HTTP 管理接口

pub mod logger;
pub mod web;
