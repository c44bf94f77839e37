//! # 启动模块
//!
//! 根据配置装配路由器：注册声明的 Agent，按依赖顺序加载插件，启动任务回收器，
//! 最后提供 HTTP 管理接口

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::config::{PluginDeclaration, RouterConfig};
use crate::core::messaging::{EchoHandler, MessageHandler};
use crate::core::plugin::Plugin;
use crate::domain::PluginMetadata;
use crate::errors::RouterError;
use crate::infrastructure::logger::Timer;
use crate::infrastructure::web::{start_web_server, AppState};
use crate::plugins::logger::{LoggerPlugin, LOGGER_PLUGIN_ID};
use crate::protocol::a2a::{A2AAdapter, A2A_PLUGIN_ID};
use crate::protocol::router::Router;

/// 插件构造函数
pub type PluginFactory = Box<dyn Fn(&RouterConfig) -> Arc<dyn Plugin> + Send + Sync>;

/// 内置插件目录
///
/// 配置文件只能引用目录中已登记的插件，不支持从磁盘动态加载插件代码。
/// `a2a_adapter` 由启动器直接构造（HTTP 任务接口需要具体类型的句柄），不能登记到目录中
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl PluginCatalog {
    /// 空目录
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 包含内置插件的目录
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(LOGGER_PLUGIN_ID, |_: &RouterConfig| {
            Arc::new(LoggerPlugin::new()) as Arc<dyn Plugin>
        });
        catalog
    }

    /// 登记插件构造函数，同名时覆盖；保留的 `a2a_adapter` 被拒绝
    pub fn register<F>(&mut self, plugin_id: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&RouterConfig) -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let plugin_id = plugin_id.into();
        if plugin_id == A2A_PLUGIN_ID {
            warn!("Plugin id {} is reserved for the built-in adapter", plugin_id);
            return false;
        }
        self.factories.insert(plugin_id, Box::new(factory));
        true
    }

    pub fn create(&self, plugin_id: &str, config: &RouterConfig) -> Option<Arc<dyn Plugin>> {
        self.factories.get(plugin_id).map(|factory| factory(config))
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.contains_key(plugin_id)
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// 装配完成的运行时
pub struct Runtime {
    pub router: Router,
    pub a2a: Option<Arc<A2AAdapter>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Runtime {
    /// 关闭所有插件并停止回收器
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        for (plugin_id, ok) in self.router.plugins().shutdown_all().await {
            if !ok {
                warn!("Plugin {} did not shut down cleanly", plugin_id);
            }
        }
        info!("Router runtime stopped");
    }
}

/// 启动器
pub struct Launcher {
    config: RouterConfig,
    catalog: PluginCatalog,
}

impl Launcher {
    /// 从环境加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(RouterConfig::from_env()?))
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            catalog: PluginCatalog::builtin(),
        }
    }

    pub fn with_catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// 装配路由器，不启动 HTTP 服务
    ///
    /// 单个插件失败只记录日志并跳过，不影响其他插件
    pub async fn build(&self) -> Result<Runtime> {
        let _timer = Timer::new("bootstrap.build");
        let router = Router::new(self.config.history_capacity);

        for declaration in &self.config.agents {
            let handler: Option<Arc<dyn MessageHandler>> = declaration
                .echo
                .then(|| Arc::new(EchoHandler::new(declaration.id.clone())) as Arc<dyn MessageHandler>);
            router
                .register_agent(declaration.to_descriptor(), handler)
                .await?;
        }
        info!("Registered {} configured agents", self.config.agents.len());

        let mut a2a = None;
        let mut declared = Vec::with_capacity(self.config.plugins.len());
        for declaration in &self.config.plugins {
            // HTTP 任务接口需要具体类型的适配器句柄
            let plugin: Arc<dyn Plugin> = if declaration.id == A2A_PLUGIN_ID {
                let adapter = A2AAdapter::new(self.config.task_retention());
                a2a = Some(adapter.clone());
                adapter as Arc<dyn Plugin>
            } else {
                match self.catalog.create(&declaration.id, &self.config) {
                    Some(plugin) => plugin,
                    None => {
                        warn!("Plugin {} is not in the catalog, skipping", declaration.id);
                        continue;
                    }
                }
            };
            declared.push((declaration, plugin));
        }

        for (declaration, plugin) in initialization_order(declared)? {
            if let Err(e) = router.plugins().load(plugin).await {
                error!("Failed to load plugin {}: {}", declaration.id, e);
                if declaration.id == A2A_PLUGIN_ID {
                    a2a = None;
                }
                continue;
            }

            if !declaration.enabled {
                if let Err(e) = router.plugins().disable(&declaration.id, true).await {
                    warn!("Could not disable plugin {}: {}", declaration.id, e);
                }
            }
        }

        let sweeper = a2a
            .as_ref()
            .map(|adapter| adapter.spawn_sweeper(self.config.gc_interval()));

        info!(
            "Router ready: history capacity {}, {} plugins",
            self.config.history_capacity,
            router.plugins().list().await.len()
        );

        Ok(Runtime {
            router,
            a2a,
            sweeper,
        })
    }

    /// 装配并提供 HTTP 服务，直到收到中断信号
    pub async fn launch(&self) -> Result<()> {
        info!("Launching MCP router...");
        let runtime = self.build().await?;

        let state = Arc::new(AppState::new(runtime.router.clone(), runtime.a2a.clone()));
        let served = start_web_server(&self.config.bind, state).await;

        runtime.shutdown().await;
        served
    }
}

/// 按依赖关系排列待加载的插件
///
/// 依赖排在依赖者之前，互不依赖的插件保持声明顺序。未在配置中声明的依赖
/// 留给插件管理器在加载时拒绝；声明的插件之间存在环时返回 `Config` 错误
fn initialization_order<'a>(
    declared: Vec<(&'a PluginDeclaration, Arc<dyn Plugin>)>,
) -> std::result::Result<Vec<(&'a PluginDeclaration, Arc<dyn Plugin>)>, RouterError> {
    let mut remaining: Vec<(PluginMetadata, &'a PluginDeclaration, Arc<dyn Plugin>)> = declared
        .into_iter()
        .map(|(declaration, plugin)| (plugin.metadata(), declaration, plugin))
        .collect();
    let ids: HashSet<String> = remaining.iter().map(|(m, _, _)| m.id.clone()).collect();

    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|(metadata, _, _)| {
            metadata
                .dependencies
                .iter()
                .all(|dep| !ids.contains(dep) || placed.contains(dep))
        });
        let Some(index) = ready else {
            let stuck: Vec<&str> = remaining.iter().map(|(m, _, _)| m.id.as_str()).collect();
            error!("Circular plugin dependencies: {}", stuck.join(", "));
            return Err(RouterError::Config(format!(
                "circular plugin dependencies among: {}",
                stuck.join(", ")
            )));
        };
        let (metadata, declaration, plugin) = remaining.remove(index);
        placed.insert(metadata.id);
        ordered.push((declaration, plugin));
    }
    Ok(ordered)
}

/// 使用环境配置启动
pub async fn quick_start() -> Result<()> {
    Launcher::from_env()?.launch().await
}
