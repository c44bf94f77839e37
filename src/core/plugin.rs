//! 插件管理
//!
//! 负责插件的加载、启用/禁用、重载和事件分发，并维护插件间的依赖约束：
//! 任何插件在其声明的依赖未启用时都不能处于启用状态

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::messaging::{DeliveryResult, MessageHandler, RouterEvent};
use crate::core::registry::AgentRegistry;
use crate::domain::{AgentDescriptor, Message, PluginInfo, PluginMetadata};
use crate::errors::{Result, RouterError};
use crate::protocol::router::{Router, RouterHandle};

/// 插件接口
///
/// 所有插件通过同一个 `handle_event` 约定响应事件，能力分发不需要运行时类型检查
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件元数据（ID、版本、能力、依赖）
    fn metadata(&self) -> PluginMetadata;

    /// 初始化插件，返回错误时插件不会被安装
    async fn initialize(&self, _context: PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 关闭插件
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 处理事件，`None` 表示不响应
    async fn handle_event(&self, event_type: &str, data: &Value) -> anyhow::Result<Option<Value>>;

    /// 观察经过路由器的每条消息（在投递之前调用）
    ///
    /// 观察者不能改变路由结果，错误只会被记录
    async fn on_message(&self, _message: &Message) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 插件初始化上下文
///
/// 暴露注册表查询、Agent 自注册以及回到路由器的发送通道
#[derive(Clone)]
pub struct PluginContext {
    registry: Arc<AgentRegistry>,
    router: RouterHandle,
}

impl PluginContext {
    pub fn new(registry: Arc<AgentRegistry>, router: RouterHandle) -> Self {
        Self { registry, router }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub async fn find_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.registry.find(agent_id).await
    }

    pub async fn capable_of(&self, capability: &str) -> Vec<String> {
        self.registry.capable_of(capability).await
    }

    /// 路由器句柄（路由器已释放时为 `None`）
    pub fn router(&self) -> Option<Router> {
        self.router.upgrade()
    }

    fn require_router(&self) -> Result<Router> {
        self.router
            .upgrade()
            .ok_or_else(|| RouterError::Internal("router has been dropped".to_string()))
    }

    /// 通过路由器发送消息
    pub async fn send(&self, message: Message) -> Result<DeliveryResult> {
        self.require_router()?.send(message).await
    }

    /// 以 Agent 身份注册到路由器
    pub async fn register_agent(
        &self,
        descriptor: AgentDescriptor,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<AgentDescriptor> {
        self.require_router()?
            .register_agent(descriptor, Some(handler))
            .await
    }

    /// 注销 Agent
    pub async fn deregister_agent(&self, agent_id: &str) -> Result<()> {
        self.require_router()?.deregister_agent(agent_id).await
    }
}

/// 插件事件的响应
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResponse {
    pub plugin_id: String,
    pub response: Value,
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    metadata: PluginMetadata,
    enabled: bool,
    error: Option<String>,
}

#[derive(Default)]
struct PluginTable {
    /// 加载顺序
    order: Vec<String>,
    entries: HashMap<String, PluginEntry>,
    /// 能力 -> 插件 ID（按加载顺序）
    capabilities: HashMap<String, Vec<String>>,
}

impl PluginTable {
    fn is_enabled(&self, plugin_id: &str) -> bool {
        self.entries.get(plugin_id).is_some_and(|e| e.enabled)
    }

    /// 第一个未满足的依赖
    fn unmet_dependency(&self, metadata: &PluginMetadata) -> Option<String> {
        metadata.dependencies.iter().find_map(|dep| {
            if dep == &metadata.id {
                Some(format!("plugin '{}' cannot depend on itself", dep))
            } else if !self.entries.contains_key(dep) {
                Some(format!("dependency '{}' is not loaded", dep))
            } else if !self.is_enabled(dep) {
                Some(format!("dependency '{}' is not enabled", dep))
            } else {
                None
            }
        })
    }

    /// 直接依赖 `plugin_id` 的插件
    fn direct_dependents(&self, plugin_id: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|e| e.metadata.dependencies.iter().any(|d| d == plugin_id))
            })
            .cloned()
            .collect()
    }

    /// 传递依赖 `plugin_id` 且处于启用状态的插件（广度优先）
    fn enabled_dependents(&self, plugin_id: &str) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        let mut queue = VecDeque::from([plugin_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(&current) {
                if self.is_enabled(&dependent) && !result.contains(&dependent) {
                    result.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        result
    }

    fn info(&self, plugin_id: &str) -> Option<PluginInfo> {
        self.entries.get(plugin_id).map(|entry| PluginInfo {
            metadata: entry.metadata.clone(),
            enabled: entry.enabled,
            error: entry.error.clone(),
            dependents: self.direct_dependents(plugin_id),
        })
    }

    fn insert(&mut self, plugin: Arc<dyn Plugin>, metadata: PluginMetadata) {
        for capability in &metadata.capabilities {
            self.capabilities
                .entry(capability.clone())
                .or_default()
                .push(metadata.id.clone());
        }
        self.order.push(metadata.id.clone());
        self.entries.insert(
            metadata.id.clone(),
            PluginEntry {
                plugin,
                metadata,
                enabled: true,
                error: None,
            },
        );
    }

    fn remove(&mut self, plugin_id: &str) -> Option<PluginEntry> {
        let entry = self.entries.remove(plugin_id)?;
        self.order.retain(|id| id != plugin_id);
        for ids in self.capabilities.values_mut() {
            ids.retain(|id| id != plugin_id);
        }
        self.capabilities.retain(|_, ids| !ids.is_empty());
        Some(entry)
    }

    /// 具备某项能力且已启用的插件（按加载顺序）
    fn enabled_with(&self, capability: &str) -> Vec<(String, Arc<dyn Plugin>)> {
        self.capabilities
            .get(capability)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                self.entries
                    .get(id)
                    .filter(|e| e.enabled)
                    .map(|e| (id.clone(), e.plugin.clone()))
            })
            .collect()
    }
}

/// 插件管理器
pub struct PluginManager {
    table: RwLock<PluginTable>,
    context: PluginContext,
    events: broadcast::Sender<RouterEvent>,
}

impl PluginManager {
    pub fn new(context: PluginContext, events: broadcast::Sender<RouterEvent>) -> Self {
        Self {
            table: RwLock::new(PluginTable::default()),
            context,
            events,
        }
    }

    fn emit(&self, event: RouterEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.events.send(event);
    }

    /// 加载插件
    ///
    /// 依赖必须已全部启用；初始化失败的插件不会被安装
    pub async fn load(&self, plugin: Arc<dyn Plugin>) -> Result<PluginInfo> {
        let metadata = plugin.metadata();
        let plugin_id = metadata.id.clone();

        {
            let table = self.table.read().await;
            if table.entries.contains_key(&plugin_id) {
                return Err(RouterError::DuplicatePlugin(plugin_id));
            }
            if let Some(reason) = table.unmet_dependency(&metadata) {
                warn!("Refusing to load plugin {}: {}", plugin_id, reason);
                return Err(RouterError::Dependency {
                    plugin: plugin_id,
                    reason,
                });
            }
        }

        debug!("Initializing plugin {} v{}", plugin_id, metadata.version);
        if let Err(e) = plugin.initialize(self.context.clone()).await {
            error!("Plugin {} failed to initialize: {:#}", plugin_id, e);
            return Err(RouterError::PluginInit {
                plugin: plugin_id,
                reason: e.to_string(),
            });
        }

        // 初始化期间依赖可能被并发禁用，持锁后再校验一次
        let rejected = {
            let mut table = self.table.write().await;
            if table.entries.contains_key(&plugin_id) {
                Some(RouterError::DuplicatePlugin(plugin_id.clone()))
            } else if let Some(reason) = table.unmet_dependency(&metadata) {
                Some(RouterError::Dependency {
                    plugin: plugin_id.clone(),
                    reason,
                })
            } else {
                table.insert(plugin.clone(), metadata.clone());
                None
            }
        };

        if let Some(err) = rejected {
            if let Err(e) = plugin.shutdown().await {
                error!("Error shutting down rejected plugin {}: {:#}", plugin_id, e);
            }
            return Err(err);
        }

        info!(
            "Plugin loaded: {} ({}) v{}",
            metadata.name, plugin_id, metadata.version
        );
        self.emit(RouterEvent::PluginLoaded {
            plugin_id: plugin_id.clone(),
        });
        self.info(&plugin_id)
            .await
            .ok_or_else(|| RouterError::not_found("Plugin", plugin_id))
    }

    /// 启用插件（已启用时为幂等操作）
    pub async fn enable(&self, plugin_id: &str) -> Result<()> {
        {
            let mut table = self.table.write().await;
            let metadata = table
                .entries
                .get(plugin_id)
                .map(|e| e.metadata.clone())
                .ok_or_else(|| RouterError::not_found("Plugin", plugin_id))?;

            if table.is_enabled(plugin_id) {
                return Ok(());
            }
            if let Some(reason) = table.unmet_dependency(&metadata) {
                warn!("Refusing to enable plugin {}: {}", plugin_id, reason);
                return Err(RouterError::Dependency {
                    plugin: plugin_id.to_string(),
                    reason,
                });
            }
            if let Some(entry) = table.entries.get_mut(plugin_id) {
                entry.enabled = true;
            }
        }

        info!("Plugin enabled: {}", plugin_id);
        self.emit(RouterEvent::PluginEnabled {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// 禁用插件
    ///
    /// 有启用中的插件依赖它时：不带 `force` 返回 `Dependency` 错误；
    /// 带 `force` 则传递禁用所有依赖者。返回本次实际被禁用的插件 ID，
    /// 依赖者在前，目标插件在最后
    pub async fn disable(&self, plugin_id: &str, force: bool) -> Result<Vec<String>> {
        let cascade = {
            let mut table = self.table.write().await;
            if !table.entries.contains_key(plugin_id) {
                return Err(RouterError::not_found("Plugin", plugin_id));
            }
            if !table.is_enabled(plugin_id) {
                return Ok(Vec::new());
            }

            let dependents = table.enabled_dependents(plugin_id);
            if !dependents.is_empty() && !force {
                warn!(
                    "Cannot disable plugin {} because it is required by: {}",
                    plugin_id,
                    dependents.join(", ")
                );
                return Err(RouterError::Dependency {
                    plugin: plugin_id.to_string(),
                    reason: format!("required by enabled plugins: {}", dependents.join(", ")),
                });
            }

            let mut cascade: Vec<String> = dependents.into_iter().rev().collect();
            cascade.push(plugin_id.to_string());
            for id in &cascade {
                if let Some(entry) = table.entries.get_mut(id) {
                    entry.enabled = false;
                }
            }
            cascade
        };

        if cascade.len() > 1 {
            info!(
                "Plugin {} disabled with cascade: {}",
                plugin_id,
                cascade.join(", ")
            );
        } else {
            info!("Plugin disabled: {}", plugin_id);
        }
        for id in &cascade {
            self.emit(RouterEvent::PluginDisabled {
                plugin_id: id.clone(),
            });
        }
        Ok(cascade)
    }

    /// 重载插件：先关闭再重新初始化
    ///
    /// 初始化失败时插件及其启用中的依赖者都会被禁用，失败原因记录在插件信息中
    pub async fn reload(&self, plugin_id: &str) -> Result<()> {
        let plugin = {
            let table = self.table.read().await;
            table
                .entries
                .get(plugin_id)
                .map(|e| e.plugin.clone())
                .ok_or_else(|| RouterError::not_found("Plugin", plugin_id))?
        };

        if let Err(e) = plugin.shutdown().await {
            error!("Error shutting down plugin {} for reload: {:#}", plugin_id, e);
        }

        let outcome = plugin.initialize(self.context.clone()).await;
        let success = outcome.is_ok();
        {
            let mut table = self.table.write().await;
            match &outcome {
                Ok(()) => {
                    if let Some(entry) = table.entries.get_mut(plugin_id) {
                        entry.error = None;
                    }
                }
                Err(e) => {
                    let mut disabled = table.enabled_dependents(plugin_id);
                    disabled.push(plugin_id.to_string());
                    for id in &disabled {
                        if let Some(entry) = table.entries.get_mut(id) {
                            entry.enabled = false;
                        }
                    }
                    if let Some(entry) = table.entries.get_mut(plugin_id) {
                        entry.error = Some(e.to_string());
                    }
                }
            }
        }

        self.emit(RouterEvent::PluginReloaded {
            plugin_id: plugin_id.to_string(),
            success,
        });

        match outcome {
            Ok(()) => {
                info!("Plugin reloaded: {}", plugin_id);
                Ok(())
            }
            Err(e) => {
                warn!("Plugin {} initialization failed after reload: {:#}", plugin_id, e);
                Err(RouterError::PluginInit {
                    plugin: plugin_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 卸载插件，有启用中的依赖者时拒绝
    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        let entry = {
            let mut table = self.table.write().await;
            if !table.entries.contains_key(plugin_id) {
                return Err(RouterError::not_found("Plugin", plugin_id));
            }
            let dependents = table.enabled_dependents(plugin_id);
            if !dependents.is_empty() {
                return Err(RouterError::Dependency {
                    plugin: plugin_id.to_string(),
                    reason: format!("required by enabled plugins: {}", dependents.join(", ")),
                });
            }
            table.remove(plugin_id)
        };

        if let Some(entry) = entry {
            if let Err(e) = entry.plugin.shutdown().await {
                error!("Error shutting down plugin {}: {:#}", plugin_id, e);
            }
        }

        info!("Plugin unloaded: {}", plugin_id);
        self.emit(RouterEvent::PluginUnloaded {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// 按能力分发事件
    ///
    /// 按加载顺序依次投递给启用中且声明该能力的插件，第一个非空响应胜出；
    /// 无人响应返回 `None`。单个插件出错只记录日志，不影响后续插件
    pub async fn dispatch(
        &self,
        capability: &str,
        event_type: &str,
        data: &Value,
    ) -> Option<PluginResponse> {
        let candidates = self.table.read().await.enabled_with(capability);

        for (plugin_id, plugin) in candidates {
            match plugin.handle_event(event_type, data).await {
                Ok(Some(response)) => {
                    debug!(
                        "Plugin {} answered {} event '{}'",
                        plugin_id, capability, event_type
                    );
                    return Some(PluginResponse {
                        plugin_id,
                        response,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Error handling event {} in plugin {}: {:#}",
                        event_type, plugin_id, e
                    );
                }
            }
        }
        None
    }

    /// 向所有启用中的插件广播事件，收集每个插件的非空响应
    pub async fn broadcast_event(&self, event_type: &str, data: &Value) -> Vec<PluginResponse> {
        let mut responses = Vec::new();
        for (plugin_id, plugin) in self.enabled_plugins().await {
            match plugin.handle_event(event_type, data).await {
                Ok(Some(response)) => responses.push(PluginResponse {
                    plugin_id,
                    response,
                }),
                Ok(None) => {}
                Err(e) => error!(
                    "Error handling event {} in plugin {}: {:#}",
                    event_type, plugin_id, e
                ),
            }
        }
        responses
    }

    /// 把路由中的消息交给所有启用中的插件观察
    pub async fn notify_message(&self, message: &Message) {
        for (plugin_id, plugin) in self.enabled_plugins().await {
            if let Err(e) = plugin.on_message(message).await {
                warn!(
                    "Plugin {} failed to observe message {}: {:#}",
                    plugin_id,
                    message.id(),
                    e
                );
            }
        }
    }

    /// 启用中的插件（按加载顺序）
    async fn enabled_plugins(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        let table = self.table.read().await;
        table
            .order
            .iter()
            .filter_map(|id| {
                table
                    .entries
                    .get(id)
                    .filter(|e| e.enabled)
                    .map(|e| (id.clone(), e.plugin.clone()))
            })
            .collect()
    }

    /// 关闭所有插件（按加载顺序的逆序），返回每个插件的关闭结果
    pub async fn shutdown_all(&self) -> Vec<(String, bool)> {
        let plugins: Vec<(String, Arc<dyn Plugin>)> = {
            let mut table = self.table.write().await;
            for entry in table.entries.values_mut() {
                entry.enabled = false;
            }
            table
                .order
                .iter()
                .rev()
                .filter_map(|id| table.entries.get(id).map(|e| (id.clone(), e.plugin.clone())))
                .collect()
        };

        let mut results = Vec::with_capacity(plugins.len());
        for (plugin_id, plugin) in plugins {
            let ok = match plugin.shutdown().await {
                Ok(()) => true,
                Err(e) => {
                    error!("Error shutting down plugin {}: {:#}", plugin_id, e);
                    false
                }
            };
            results.push((plugin_id, ok));
        }
        info!("All plugins shut down");
        results
    }

    pub async fn info(&self, plugin_id: &str) -> Option<PluginInfo> {
        self.table.read().await.info(plugin_id)
    }

    /// 按加载顺序列出插件
    pub async fn list(&self) -> Vec<PluginInfo> {
        let table = self.table.read().await;
        table.order.iter().filter_map(|id| table.info(id)).collect()
    }

    pub async fn is_enabled(&self, plugin_id: &str) -> bool {
        self.table.read().await.is_enabled(plugin_id)
    }

    /// 启用中且具备某项能力的插件 ID
    pub async fn plugins_with(&self, capability: &str) -> Vec<String> {
        self.table
            .read()
            .await
            .enabled_with(capability)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}
