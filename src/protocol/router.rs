//! 消息路由器
//!
//! 负责将消息投递到正确的目的地：
//! - 直接路由：投递给指定 Agent 的处理器
//! - 广播路由：并发投递给所有活跃 Agent，部分失败被收集而不是抛出
//! - 能力路由：先交给插件管理器分发，无插件响应时回退到注册表中具备该能力的 Agent
//!
//! 路由器从不重试，也从不在调用处理器时持有内部锁。同一发送者到同一接收者的
//! 消息经过独立的投递通道串行化，保证处理器按发送顺序观察到它们

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::history::{HistoryView, MessageHistory, DEFAULT_HISTORY_CAPACITY};
use crate::core::messaging::{
    Delivery, DeliveryFailure, DeliveryResult, MessageHandler, RouteKind, RouterEvent,
};
use crate::core::plugin::{PluginContext, PluginManager};
use crate::core::registry::AgentRegistry;
use crate::domain::{AgentDescriptor, Message, Recipient};
use crate::errors::{Result, RouterError};

/// 事件通道容量，落后的订阅者会丢失最旧的事件
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct RouterInner {
    registry: Arc<AgentRegistry>,
    plugins: PluginManager,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    history: MessageHistory,
    /// (sender, recipient) -> 投递通道锁
    lanes: DashMap<(String, String), Arc<Mutex<()>>>,
    events: broadcast::Sender<RouterEvent>,
}

/// 消息路由器
///
/// 显式构造后以句柄形式传给所有依赖方；克隆开销很小，所有克隆共享同一份状态
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// 路由器的弱引用句柄
///
/// 插件通过它回调路由器，避免插件与路由器之间形成引用环
#[derive(Clone)]
pub struct RouterHandle(Weak<RouterInner>);

impl RouterHandle {
    pub fn upgrade(&self) -> Option<Router> {
        self.0.upgrade().map(|inner| Router { inner })
    }
}

impl Router {
    /// 创建新的路由器
    pub fn new(history_capacity: usize) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<RouterInner>| {
            let context = PluginContext::new(registry.clone(), RouterHandle(weak.clone()));
            RouterInner {
                plugins: PluginManager::new(context, events.clone()),
                registry,
                handlers: RwLock::new(HashMap::new()),
                history: MessageHistory::new(history_capacity),
                lanes: DashMap::new(),
                events,
            }
        });

        info!("Router initialized (history capacity {})", history_capacity);
        Self { inner }
    }

    /// 路由器的弱引用句柄
    pub fn handle(&self) -> RouterHandle {
        RouterHandle(Arc::downgrade(&self.inner))
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    /// 订阅路由事件（消息记录、Agent 与插件的生命周期变化）
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: RouterEvent) {
        let _ = self.inner.events.send(event);
    }

    /// 注册 Agent，并可选地挂载消息处理器
    pub async fn register_agent(
        &self,
        descriptor: AgentDescriptor,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<AgentDescriptor> {
        let agent = self.inner.registry.register(descriptor).await?;
        if let Some(handler) = handler {
            self.inner
                .handlers
                .write()
                .await
                .insert(agent.id.clone(), handler);
        }
        self.emit(RouterEvent::AgentRegistered {
            agent: agent.clone(),
        });
        Ok(agent)
    }

    /// 为已注册的 Agent 挂载（或替换）处理器
    pub async fn attach_handler(
        &self,
        agent_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if !self.inner.registry.contains(agent_id).await {
            return Err(RouterError::not_found("Agent", agent_id));
        }
        self.inner
            .handlers
            .write()
            .await
            .insert(agent_id.to_string(), handler);
        debug!("Handler attached to agent {}", agent_id);
        Ok(())
    }

    /// 注销 Agent，正在投递给它的消息按投递失败处理
    pub async fn deregister_agent(&self, agent_id: &str) -> Result<()> {
        self.inner.registry.deregister(agent_id).await?;
        self.inner.handlers.write().await.remove(agent_id);
        self.inner
            .lanes
            .retain(|(from, to), _| from != agent_id && to != agent_id);
        self.emit(RouterEvent::AgentDeregistered {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 最近 `limit` 条消息，从新到旧，可重复遍历
    pub async fn history(&self, limit: usize) -> HistoryView {
        self.inner.history.snapshot(limit).await
    }

    /// 历史中的消息条数
    pub async fn history_len(&self) -> usize {
        self.inner.history.len().await
    }

    /// 当前存在的投递通道数（仅包含有投递在途的发送者/接收者组合）
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// 发送消息
    ///
    /// 先记录到历史，再通知观察插件，最后按接收者类型路由
    pub async fn send(&self, message: Message) -> Result<DeliveryResult> {
        let message = Arc::new(message);
        if let Some(evicted) = self.inner.history.push(message.clone()).await {
            debug!("History full, evicted message {}", evicted.id());
        }
        self.emit(RouterEvent::MessageRecorded {
            message: (*message).clone(),
        });
        self.inner.registry.touch(message.sender()).await;
        self.inner.plugins.notify_message(&message).await;

        debug!(
            "Routing message {} ({}) from {} to {}",
            message.id(),
            message.msg_type(),
            message.sender(),
            message.recipient()
        );

        match message.recipient() {
            Recipient::Agent(agent_id) => {
                let delivery = self.deliver(&message, agent_id).await?;
                let mut result = DeliveryResult::new(message.id(), RouteKind::Direct);
                result.delivered.push(delivery);
                Ok(result)
            }
            Recipient::Broadcast => Ok(self.route_broadcast(&message).await),
            Recipient::Capability(capability) => {
                self.route_capability(&message, capability).await
            }
        }
    }

    /// 带超时的发送
    ///
    /// 超时后返回 `Timeout`，消息不会被丢弃，投递仍在后台继续
    pub async fn send_with_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<DeliveryResult> {
        let router = self.clone();
        let message_id = message.id().to_string();
        let mut task = tokio::spawn(async move { router.send(message).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined.map_err(|e| RouterError::Internal(e.to_string()))?,
            Err(_) => {
                warn!(
                    "Send of message {} timed out after {:?}, delivery continues in background",
                    message_id, timeout
                );
                Err(RouterError::Timeout {
                    operation: "send",
                    elapsed: timeout,
                })
            }
        }
    }

    /// 投递给单个 Agent
    async fn deliver(&self, message: &Arc<Message>, agent_id: &str) -> Result<Delivery> {
        let agent = match self.inner.registry.find(agent_id).await {
            Some(agent) => agent,
            None => {
                warn!("Unknown recipient: {}", agent_id);
                return Err(RouterError::AgentUnavailable(agent_id.to_string()));
            }
        };
        if !agent.is_active() {
            warn!("Recipient {} is inactive", agent_id);
            return Err(RouterError::AgentUnavailable(agent_id.to_string()));
        }

        let handler = self.inner.handlers.read().await.get(agent_id).cloned();
        let Some(handler) = handler else {
            warn!("Recipient {} has no handler attached", agent_id);
            return Err(RouterError::AgentUnavailable(agent_id.to_string()));
        };

        let key = (message.sender().to_string(), agent_id.to_string());
        let outcome = {
            let lane = self.inner.lanes.entry(key.clone()).or_default().clone();
            let _ordered = lane.lock().await;
            handler.handle(message).await
        };
        // 没有其他投递持有或等待该通道时回收，避免按会话无限增长
        self.inner
            .lanes
            .remove_if(&key, |_, lane| Arc::strong_count(lane) == 1);

        match outcome {
            Ok(reply) => {
                debug!("Delivered message {} to {}", message.id(), agent_id);
                Ok(Delivery {
                    recipient: agent_id.to_string(),
                    reply,
                })
            }
            Err(e) => {
                warn!(
                    "Handler for {} failed on message {}: {:#}",
                    agent_id,
                    message.id(),
                    e
                );
                Err(RouterError::Delivery {
                    recipient: agent_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 广播：尽力而为，并发投递并汇总结果
    async fn route_broadcast(&self, message: &Arc<Message>) -> DeliveryResult {
        let targets: Vec<String> = self
            .inner
            .registry
            .list()
            .await
            .into_iter()
            .filter(|a| a.is_active() && a.id != message.sender())
            .map(|a| a.id)
            .collect();

        let outcomes = join_all(targets.iter().map(|id| self.deliver(message, id))).await;

        let mut result = DeliveryResult::new(message.id(), RouteKind::Broadcast);
        for (agent_id, outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(delivery) => result.delivered.push(delivery),
                Err(e) => result
                    .failures
                    .push(DeliveryFailure::from_error(agent_id, &e)),
            }
        }

        info!(
            "Broadcast {} delivered to {} agents ({} failed)",
            message.id(),
            result.delivered.len(),
            result.failures.len()
        );
        result
    }

    /// 能力路由：插件优先，回退到注册表中第一个成功接收的 Agent
    async fn route_capability(
        &self,
        message: &Arc<Message>,
        capability: &str,
    ) -> Result<DeliveryResult> {
        let mut result = DeliveryResult::new(message.id(), RouteKind::Capability);

        if let Some(answer) = self
            .inner
            .plugins
            .dispatch(capability, message.msg_type(), message.content())
            .await
        {
            let reply = message.reply(
                answer.plugin_id.clone(),
                message.msg_type(),
                answer.response,
            );
            result.delivered.push(Delivery {
                recipient: answer.plugin_id,
                reply: Some(reply),
            });
            return Ok(result);
        }

        let candidates: Vec<String> = self
            .inner
            .registry
            .capable_of(capability)
            .await
            .into_iter()
            .filter(|id| id != message.sender())
            .collect();

        if candidates.is_empty() {
            warn!("No plugin or agent provides capability {}", capability);
            return Err(RouterError::AgentUnavailable(
                Recipient::Capability(capability.to_string()).to_string(),
            ));
        }

        for agent_id in candidates {
            match self.deliver(message, &agent_id).await {
                Ok(delivery) => {
                    result.delivered.push(delivery);
                    break;
                }
                Err(e) => result
                    .failures
                    .push(DeliveryFailure::from_error(agent_id, &e)),
            }
        }
        Ok(result)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
