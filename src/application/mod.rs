//! 应用层：面向会话的编排

pub mod session;
