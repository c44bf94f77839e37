//! 插件元数据

use serde::{Deserialize, Serialize};

/// 插件声明的静态信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// 插件声明的能力，按声明顺序
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 依赖的插件 ID
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_dependency(mut self, plugin_id: impl Into<String>) -> Self {
        let plugin_id = plugin_id.into();
        if !self.dependencies.contains(&plugin_id) {
            self.dependencies.push(plugin_id);
        }
        self
    }

    pub fn provides(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// 插件运行时信息（供管理接口展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(flatten)]
    pub metadata: PluginMetadata,
    pub enabled: bool,
    /// 最近一次初始化/重载失败的原因
    pub error: Option<String>,
    /// 依赖本插件的插件 ID
    pub dependents: Vec<String>,
}
