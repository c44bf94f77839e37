//! 日志模块
//!
//! 基于 `tracing-subscriber`：
//! - `RUST_LOG`: 日志级别过滤（默认 `info`）
//! - `LOG_FORMAT`: 日志格式（`pretty`, `compact`, `json`）

use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志格式类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 人类可读格式（带颜色）
    Pretty,
    /// 紧凑单行格式
    Compact,
    /// JSON 结构化格式（适合日志收集系统）
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// 是否启用颜色（JSON 格式无效）
    pub enable_color: bool,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否显示文件名和行号
    pub show_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            enable_color: true,
            show_target: true,
            show_file: false,
        }
    }
}

impl LogConfig {
    /// 从 `LOG_FORMAT` 读取格式，无法识别时保留默认值
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(format) = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.format = format;
        }
        config
    }
}

/// 初始化日志系统
///
/// 全局订阅者已存在时返回 `false`（例如多个测试重复初始化）
pub fn init(config: LogConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let installed = match config.format {
        LogFormat::Pretty => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.show_target)
                    .with_file(config.show_file)
                    .with_line_number(config.show_file)
                    .with_ansi(config.enable_color),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.show_target)
                    .with_file(config.show_file)
                    .with_line_number(config.show_file)
                    .with_ansi(config.enable_color),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.show_target)
                    .with_file(config.show_file)
                    .with_line_number(config.show_file)
                    .with_current_span(true),
            )
            .try_init(),
    };
    installed.is_ok()
}

/// 性能计时器，离开作用域时记录耗时
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            target: "metrics",
            operation = %self.name,
            elapsed_ms = %format!("{:.2}", elapsed_ms),
            "operation completed"
        );
    }
}
