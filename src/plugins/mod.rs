//! 内置插件

pub mod logger;
