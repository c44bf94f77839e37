//! A2A (Agent-to-Agent) 协议适配器
//!
//! 以插件形式挂在路由器上，把面向任务的语义（提交 / 查询 / 取消）映射到消息路由：
//! - 每个任务维护一个状态机，见 [`crate::domain::task`]
//! - 交给目标 Agent 时发送 JSON-RPC `tasks/send` 请求（消息类型 `a2a_request`）
//! - 目标 Agent 可同步回复，也可稍后向适配器发送 `a2a_response`
//! - 其他 Agent 可通过 JSON-RPC `tasks/create`、`tasks/get`、`tasks/cancel` 使用适配器
//!
//! 终态任务在第一次被查询后进入保留期，保留期结束后被回收

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::messaging::MessageHandler;
use crate::core::plugin::{Plugin, PluginContext};
use crate::domain::{A2ATask, AgentDescriptor, Artifact, Message, PluginMetadata, TaskState};
use crate::errors::{Result, RouterError};

/// 适配器插件 ID，同时也是它在注册表中的 Agent ID
pub const A2A_PLUGIN_ID: &str = "a2a_adapter";
/// 可接收 A2A 任务的 Agent 必须声明的能力
pub const A2A_CAPABILITY: &str = "a2a";
/// 发往目标 Agent 的请求消息类型
pub const A2A_REQUEST: &str = "a2a_request";
/// 目标 Agent 回复的消息类型
pub const A2A_RESPONSE: &str = "a2a_response";
/// 终态任务被查询后的默认保留时间
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(300);

const JSONRPC_VERSION: &str = "2.0";
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const TASK_NOT_CANCELABLE: i64 = -32002;

/// 任务取消标志
///
/// 适配器不会强行中断处理器，长时间运行的处理器应自行检查该标志
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct TaskRecord {
    task: A2ATask,
    cancel: CancellationFlag,
    /// 终态任务第一次被查询后开始计时
    expires_at: Option<Instant>,
}

impl TaskRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A2A 适配器
pub struct A2AAdapter {
    me: Weak<A2AAdapter>,
    context: RwLock<Option<PluginContext>>,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    retention: Duration,
}

impl A2AAdapter {
    /// 创建适配器
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            context: RwLock::new(None),
            tasks: Mutex::new(HashMap::new()),
            retention,
        })
    }

    async fn context(&self) -> Result<PluginContext> {
        self.context
            .read()
            .await
            .clone()
            .ok_or_else(|| RouterError::Internal("A2A adapter is not initialized".to_string()))
    }

    /// 注册一个 A2A 兼容的 Agent（自动补上 `a2a` 能力）
    pub async fn register_a2a_agent(
        &self,
        descriptor: AgentDescriptor,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<AgentDescriptor> {
        let descriptor = descriptor.with_capability(A2A_CAPABILITY);
        self.context().await?.register_agent(descriptor, handler).await
    }

    /// 创建任务，初始状态为 SUBMITTED
    ///
    /// 目标必须已注册并声明 `a2a` 能力
    pub async fn create_task(&self, target_agent: &str, input: Vec<Artifact>) -> Result<String> {
        let context = self.context().await?;
        let capable = context
            .find_agent(target_agent)
            .await
            .is_some_and(|agent| agent.has_capability(A2A_CAPABILITY));
        if !capable {
            warn!("Rejecting A2A task for unknown agent {}", target_agent);
            return Err(RouterError::UnknownAgent(target_agent.to_string()));
        }

        let task = A2ATask::new(target_agent, input);
        let task_id = task.id.clone();
        self.tasks.lock().await.insert(
            task_id.clone(),
            TaskRecord {
                task,
                cancel: CancellationFlag::default(),
                expires_at: None,
            },
        );

        info!("A2A task {} submitted for agent {}", task_id, target_agent);
        Ok(task_id)
    }

    /// 查询任务
    ///
    /// 终态任务第一次被查询时开始保留期计时，过期后返回 `NotFound`
    pub async fn get_task(&self, task_id: &str) -> Result<A2ATask> {
        let now = Instant::now();
        let mut tasks = self.tasks.lock().await;

        let expired = tasks.get(task_id).is_some_and(|r| r.is_expired(now));
        if expired {
            tasks.remove(task_id);
            debug!("A2A task {} expired", task_id);
        }

        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| RouterError::not_found("Task", task_id))?;
        if record.task.state.is_terminal() && record.expires_at.is_none() {
            record.expires_at = Some(now + self.retention);
        }
        Ok(record.task.clone())
    }

    /// 带超时的查询（客户端侧超时）
    pub async fn get_task_with_timeout(&self, task_id: &str, timeout: Duration) -> Result<A2ATask> {
        match tokio::time::timeout(timeout, self.get_task(task_id)).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::Timeout {
                operation: "get_task",
                elapsed: timeout,
            }),
        }
    }

    /// 所有未回收的任务（不触发保留期计时）
    pub async fn list_tasks(&self) -> Vec<A2ATask> {
        let tasks = self.tasks.lock().await;
        let mut list: Vec<A2ATask> = tasks.values().map(|r| r.task.clone()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// 任务的取消标志
    pub async fn cancellation_flag(&self, task_id: &str) -> Option<CancellationFlag> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|r| r.cancel.clone())
    }

    /// 在任务表锁内修改任务，返回修改后的快照
    async fn update<F>(&self, task_id: &str, mutate: F) -> Result<A2ATask>
    where
        F: FnOnce(&mut A2ATask) -> Result<()>,
    {
        let mut tasks = self.tasks.lock().await;
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| RouterError::not_found("Task", task_id))?;
        mutate(&mut record.task)?;
        Ok(record.task.clone())
    }

    /// SUBMITTED -> WORKING
    pub async fn mark_working(&self, task_id: &str) -> Result<A2ATask> {
        let task = self
            .update(task_id, |t| t.transition(TaskState::Working))
            .await?;
        debug!("A2A task {} is working", task_id);
        Ok(task)
    }

    /// WORKING -> COMPLETED
    pub async fn complete_task(&self, task_id: &str, output: Vec<Artifact>) -> Result<A2ATask> {
        let task = self.update(task_id, |t| t.complete(output)).await?;
        info!("A2A task {} completed", task_id);
        Ok(task)
    }

    /// WORKING -> FAILED
    pub async fn fail_task(&self, task_id: &str, error: impl Into<String>) -> Result<A2ATask> {
        let error = error.into();
        let task = self.update(task_id, |t| t.fail(error)).await?;
        warn!("A2A task {} failed: {}", task_id, task.error.as_deref().unwrap_or(""));
        Ok(task)
    }

    /// 取消任务
    ///
    /// SUBMITTED / WORKING -> CANCELED；已取消时再次取消为无操作；
    /// COMPLETED / FAILED 返回 `InvalidState`
    pub async fn cancel_task(&self, task_id: &str) -> Result<A2ATask> {
        let (task, was_working) = {
            let mut tasks = self.tasks.lock().await;
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| RouterError::not_found("Task", task_id))?;

            if record.task.state == TaskState::Canceled {
                return Ok(record.task.clone());
            }
            let was_working = record.task.state == TaskState::Working;
            record.task.transition(TaskState::Canceled)?;
            record.cancel.cancel();
            (record.task.clone(), was_working)
        };

        info!("A2A task {} canceled", task_id);

        // 已交给目标 Agent 的任务，在后台通知其停止（尽力而为）。
        // 通知与进行中的 tasks/send 共用同一投递通道，不能在这里等待
        if was_working {
            if let Ok(context) = self.context().await {
                let request = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": uuid::Uuid::new_v4().to_string(),
                    "method": "tasks/cancel",
                    "params": { "taskId": task_id },
                });
                let notice = Message::direct(A2A_PLUGIN_ID, &task.target_agent, A2A_REQUEST, request);
                let task_id = task_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = context.send(notice).await {
                        debug!("Cancel notice for task {} not delivered: {}", task_id, e);
                    }
                });
            }
        }
        Ok(task)
    }

    /// 把任务交给目标 Agent（SUBMITTED -> WORKING）
    ///
    /// 目标同步回复的 `a2a_response` 会立即生效；投递失败时任务转为 FAILED
    pub async fn start_task(&self, task_id: &str) -> Result<A2ATask> {
        let task = self.mark_working(task_id).await?;
        let context = self.context().await?;

        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": task.id,
            "method": "tasks/send",
            "params": {
                "id": task.id,
                "input": task.input,
            },
        });
        let message = Message::direct(A2A_PLUGIN_ID, &task.target_agent, A2A_REQUEST, request);

        match context.send(message).await {
            Ok(result) => {
                // 同步回复由目标 Agent 的处理器直接返回
                if let Some(reply) = result.replies().find(|r| r.msg_type() == A2A_RESPONSE) {
                    if let Err(e) = self.apply_response(&task.target_agent, reply.content()).await {
                        warn!("Ignoring A2A reply for task {}: {}", task_id, e);
                    }
                }
            }
            Err(e) => {
                // 期间可能已被取消，此时失败迁移被拒绝是预期行为
                if let Err(rejected) = self.fail_task(task_id, e.to_string()).await {
                    debug!("Task {} not marked failed: {}", task_id, rejected);
                }
            }
        }

        self.peek(task_id).await
    }

    /// 读取任务快照，不触发保留期计时
    async fn peek(&self, task_id: &str) -> Result<A2ATask> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|r| r.task.clone())
            .ok_or_else(|| RouterError::not_found("Task", task_id))
    }

    /// 应用目标 Agent 的 JSON-RPC 响应
    ///
    /// 只有任务的目标 Agent 可以推进任务，其他发送者的响应被拒绝且不修改任务
    pub async fn apply_response(&self, sender: &str, response: &Value) -> Result<A2ATask> {
        let result = response.get("result").filter(|r| !r.is_null());
        let task_id = response
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| result.and_then(|r| r.get("id")).and_then(Value::as_str))
            .ok_or_else(|| RouterError::Internal("A2A response without task id".to_string()))?
            .to_string();

        let current = self.peek(&task_id).await?;
        if current.target_agent != sender {
            warn!(
                "Rejecting A2A response for task {} from {} (target is {})",
                task_id, sender, current.target_agent
            );
            return Err(RouterError::NotTaskOwner {
                task_id,
                sender: sender.to_string(),
            });
        }

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let detail = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return self.fail_task(&task_id, detail).await;
        }

        let result = result
            .ok_or_else(|| RouterError::Internal("A2A response without result".to_string()))?;
        let state = result
            .get("state")
            .and_then(Value::as_str)
            .map(str::parse::<TaskState>)
            .transpose()
            .map_err(RouterError::Internal)?;

        match state {
            Some(TaskState::Completed) => {
                let output = parse_artifacts(result.get("output"))?;
                self.complete_task(&task_id, output).await
            }
            Some(TaskState::Failed) => {
                let detail = result
                    .get("error")
                    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .unwrap_or_else(|| "agent reported failure".to_string());
                self.fail_task(&task_id, detail).await
            }
            Some(TaskState::Canceled) => self.cancel_task(&task_id).await,
            Some(TaskState::Working) => {
                if current.state == TaskState::Submitted {
                    self.mark_working(&task_id).await
                } else {
                    Ok(current)
                }
            }
            Some(TaskState::Submitted) | None => self.peek(&task_id).await,
        }
    }

    /// 处理 JSON-RPC 请求，返回 JSON-RPC 响应
    pub async fn handle_request(&self, method: &str, request_id: &Value, params: &Value) -> Value {
        let outcome = match method {
            "tasks/create" => self.rpc_create(params).await,
            "tasks/get" => match task_id_param(params) {
                Some(id) => self
                    .get_task(id)
                    .await
                    .map(|t| task_to_json(&t))
                    .map_err(RpcError::from),
                None => Err(RpcError::invalid_params("missing taskId")),
            },
            "tasks/cancel" => match task_id_param(params) {
                Some(id) => self
                    .cancel_task(id)
                    .await
                    .map(|t| json!({ "id": t.id, "state": t.state }))
                    .map_err(RpcError::from),
                None => Err(RpcError::invalid_params("missing taskId")),
            },
            other => {
                warn!("Unknown A2A method: {}", other);
                Err(RpcError {
                    code: METHOD_NOT_FOUND,
                    message: "Method not found".to_string(),
                    reason: other.to_string(),
                })
            }
        };

        match outcome {
            Ok(result) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": request_id,
                "result": result,
            }),
            Err(e) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": request_id,
                "error": {
                    "code": e.code,
                    "message": e.message,
                    "data": { "reason": e.reason },
                },
            }),
        }
    }

    async fn rpc_create(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let target = params
            .get("agentId")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing agentId"))?;
        let input = parse_artifacts(params.get("input"))
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        let task_id = self.create_task(target, input).await?;
        Ok(json!({ "id": task_id, "state": TaskState::Submitted }))
    }

    /// 回收已过保留期的任务，返回回收数量
    pub async fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, record| !record.is_expired(now));
        let removed = before - tasks.len();
        if removed > 0 {
            debug!("Collected {} expired A2A tasks", removed);
        }
        removed
    }

    /// 启动周期性回收任务，适配器释放后自动退出
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let adapter = self.me.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match adapter.upgrade() {
                    Some(adapter) => {
                        adapter.collect_garbage().await;
                    }
                    None => break,
                }
            }
        })
    }
}

/// JSON-RPC 错误
struct RpcError {
    code: i64,
    message: String,
    reason: String,
}

impl RpcError {
    fn invalid_params(reason: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: "Invalid parameters".to_string(),
            reason: reason.into(),
        }
    }
}

impl From<RouterError> for RpcError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NotFound { .. } => RpcError::invalid_params("Task not found"),
            RouterError::InvalidState { .. } => RpcError {
                code: TASK_NOT_CANCELABLE,
                message: "Task cannot be canceled".to_string(),
                reason: err.to_string(),
            },
            other => RpcError::invalid_params(other.to_string()),
        }
    }
}

fn task_id_param(params: &Value) -> Option<&str> {
    params.get("taskId").and_then(Value::as_str)
}

fn parse_artifacts(value: Option<&Value>) -> Result<Vec<Artifact>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| RouterError::Internal(format!("invalid artifacts: {}", e))),
    }
}

fn task_to_json(task: &A2ATask) -> Value {
    serde_json::to_value(task).unwrap_or(Value::Null)
}

#[async_trait]
impl Plugin for A2AAdapter {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(A2A_PLUGIN_ID, "A2A Adapter", env!("CARGO_PKG_VERSION"))
            .with_description("Bridges the router to the Agent-to-Agent task protocol")
            .with_capability(A2A_CAPABILITY)
    }

    async fn initialize(&self, context: PluginContext) -> anyhow::Result<()> {
        let inbox = Arc::new(AdapterInbox {
            adapter: self.me.clone(),
        });
        context
            .register_agent(
                AgentDescriptor::new(A2A_PLUGIN_ID, "A2A Adapter").with_capability(A2A_PLUGIN_ID),
                inbox,
            )
            .await?;
        *self.context.write().await = Some(context);
        info!("A2A adapter initialized");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(context) = self.context.write().await.take() {
            if let Err(e) = context.deregister_agent(A2A_PLUGIN_ID).await {
                debug!("A2A adapter agent already gone: {}", e);
            }
        }
        info!("A2A adapter shut down");
        Ok(())
    }

    async fn handle_event(&self, event_type: &str, data: &Value) -> anyhow::Result<Option<Value>> {
        // 既接受完整的 JSON-RPC 请求，也接受以事件类型为方法名的裸参数
        let (method, request_id, params) = match data.get("method").and_then(Value::as_str) {
            Some(method) => (
                method.to_string(),
                data.get("id").cloned().unwrap_or(Value::Null),
                data.get("params").cloned().unwrap_or(Value::Null),
            ),
            None if event_type.starts_with("tasks/") => {
                (event_type.to_string(), Value::Null, data.clone())
            }
            None => return Ok(None),
        };
        Ok(Some(self.handle_request(&method, &request_id, &params).await))
    }
}

/// 适配器在路由器中的收件箱
struct AdapterInbox {
    adapter: Weak<A2AAdapter>,
}

#[async_trait]
impl MessageHandler for AdapterInbox {
    async fn handle(&self, message: &Message) -> anyhow::Result<Option<Message>> {
        let adapter = self
            .adapter
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("A2A adapter has been dropped"))?;

        match message.msg_type() {
            A2A_REQUEST => {
                let request = message.content();
                let method = request
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let request_id = request.get("id").cloned().unwrap_or(Value::Null);
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let response = adapter.handle_request(method, &request_id, &params).await;
                Ok(Some(message.reply(A2A_PLUGIN_ID, A2A_RESPONSE, response)))
            }
            A2A_RESPONSE => {
                adapter
                    .apply_response(message.sender(), message.content())
                    .await?;
                Ok(None)
            }
            other => {
                debug!("A2A adapter ignoring message type {}", other);
                Ok(None)
            }
        }
    }
}
