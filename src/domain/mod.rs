//! Domain Layer
//!
//! Core entity definitions: messages, agents, plugins and A2A tasks

pub mod agent;
pub mod message;
pub mod plugin;
pub mod task;

pub use agent::{AgentDescriptor, AgentStatus};
pub use message::{Message, MessageId, Recipient, BROADCAST, CAPABILITY_PREFIX, SYSTEM_SENDER};
pub use plugin::{PluginInfo, PluginMetadata};
pub use task::{A2ATask, Artifact, TaskState};
