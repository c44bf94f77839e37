//! Agent 注册表
//!
//! 记录已知 Agent 及其声明的能力，保持注册顺序

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{AgentDescriptor, AgentStatus};
use crate::errors::{Result, RouterError};

#[derive(Default)]
struct RegistryState {
    /// 注册顺序
    order: Vec<String>,
    agents: HashMap<String, AgentDescriptor>,
}

/// Agent 注册表
///
/// 所有映射由同一把锁保护，避免并发注册/注销时丢失更新
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// 注册 Agent，状态强制为 active
    pub async fn register(&self, mut descriptor: AgentDescriptor) -> Result<AgentDescriptor> {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&descriptor.id) {
            warn!("Agent {} already registered", descriptor.id);
            return Err(RouterError::DuplicateAgent(descriptor.id));
        }

        let now = Utc::now();
        descriptor.status = AgentStatus::Active;
        descriptor.registered_at = now;
        descriptor.last_seen = now;

        state.order.push(descriptor.id.clone());
        state
            .agents
            .insert(descriptor.id.clone(), descriptor.clone());

        info!("Agent registered: {} ({})", descriptor.name, descriptor.id);
        Ok(descriptor)
    }

    /// 注销 Agent
    pub async fn deregister(&self, agent_id: &str) -> Result<AgentDescriptor> {
        let mut state = self.state.write().await;
        let descriptor = state
            .agents
            .remove(agent_id)
            .ok_or_else(|| RouterError::not_found("Agent", agent_id))?;
        state.order.retain(|id| id != agent_id);

        info!("Agent deregistered: {} ({})", descriptor.name, agent_id);
        Ok(descriptor)
    }

    /// 通过ID查找 Agent
    pub async fn find(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let state = self.state.read().await;
        state.agents.get(agent_id).cloned()
    }

    /// 按注册顺序列出所有 Agent
    pub async fn list(&self) -> Vec<AgentDescriptor> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    /// 具备某项能力的 Agent ID（按注册顺序，不含重复）
    pub async fn capable_of(&self, capability: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter(|id| {
                state
                    .agents
                    .get(*id)
                    .is_some_and(|a| a.has_capability(capability))
            })
            .cloned()
            .collect()
    }

    /// 更新 Agent 状态
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RouterError::not_found("Agent", agent_id))?;
        agent.status = status;
        debug!("Agent {} status -> {:?}", agent_id, status);
        Ok(())
    }

    /// 替换 Agent 的能力集合
    pub async fn update_capabilities(
        &self,
        agent_id: &str,
        capabilities: BTreeSet<String>,
    ) -> Result<AgentDescriptor> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RouterError::not_found("Agent", agent_id))?;
        agent.capabilities = capabilities;
        debug!("Agent {} capabilities updated", agent_id);
        Ok(agent.clone())
    }

    /// 刷新最后活跃时间，未知 Agent 直接忽略
    pub async fn touch(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.last_seen = Utc::now();
        }
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.state.read().await.agents.contains_key(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
