//! 配置管理
//!
//! 启动时读取一次 YAML 配置文件，随后由环境变量覆盖：
//! - `MCP_CONFIG`: 配置文件路径（默认 `mcp_router.yaml`，文件不存在时使用默认配置）
//! - `MCP_BIND`: HTTP 监听地址
//! - `MCP_HISTORY_CAPACITY`: 消息历史容量
//! - `MCP_TASK_RETENTION_SECS`: 终态任务保留秒数

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::history::DEFAULT_HISTORY_CAPACITY;
use crate::domain::AgentDescriptor;
use crate::errors::{Result, RouterError};

pub const DEFAULT_CONFIG_PATH: &str = "mcp_router.yaml";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 300;
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;

/// 配置文件中声明的 Agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDeclaration {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 为该 Agent 挂载回显处理器
    #[serde(default)]
    pub echo: bool,
}

impl AgentDeclaration {
    pub fn to_descriptor(&self) -> AgentDescriptor {
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        AgentDescriptor::new(self.id.clone(), name).with_capabilities(self.capabilities.clone())
    }
}

/// 配置文件中声明的插件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// 路由器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub bind: String,
    pub history_capacity: usize,
    pub task_retention_secs: u64,
    pub gc_interval_secs: u64,
    pub agents: Vec<AgentDeclaration>,
    pub plugins: Vec<PluginDeclaration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            task_retention_secs: DEFAULT_TASK_RETENTION_SECS,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            agents: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// 解析 YAML 文本
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: RouterConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded router configuration from {}", path.display());
        Ok(config)
    }

    /// 从环境加载：先读 `.env`，再读配置文件，最后应用环境变量覆盖
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let explicit = std::env::var("MCP_CONFIG").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else if explicit.is_some() {
            return Err(RouterError::Config(format!("config file not found: {}", path)));
        } else {
            debug!("No config file at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    ///
    /// `lookup` 通常是 `std::env::var`，测试中可以替换
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("MCP_BIND") {
            self.bind = bind;
        }
        if let Some(capacity) = lookup("MCP_HISTORY_CAPACITY") {
            self.history_capacity = parse_number("MCP_HISTORY_CAPACITY", &capacity)?;
        }
        if let Some(retention) = lookup("MCP_TASK_RETENTION_SECS") {
            self.task_retention_secs = parse_number("MCP_TASK_RETENTION_SECS", &retention)?;
        }
        Ok(())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(RouterError::Config(
                "history_capacity must be greater than zero".to_string(),
            ));
        }
        if self.gc_interval_secs == 0 {
            return Err(RouterError::Config(
                "gc_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(RouterError::Config("agent id must not be empty".to_string()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(RouterError::Config(format!(
                    "agent {} declared twice",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RouterError::Config(format!("{} must be a number, got '{}'", key, raw)))
}
