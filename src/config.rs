//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再叠加 `--config` 指定的文件，最后用环境变量 `ARGUS__*` 覆盖
//! （双下划线表示嵌套，如 `ARGUS__SERVER__PORT=6000`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::plugins::AdapterConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub logging: LoggingSection,
    pub plugins: PluginsSection,
    /// `[adapters.<应用名>]`：加载该应用适配器时传给 initialize 的配置
    pub adapters: HashMap<String, AdapterConfig>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Argus Pilot System".to_string(),
        }
    }
}

/// [server] 段：RPC 监听地址、工作线程数、关闭宽限期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// tokio 工作线程数
    pub max_workers: usize,
    /// 优雅关闭的宽限期（毫秒），超时后强制中止服务
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            max_workers: 10,
            shutdown_grace_ms: 1000,
        }
    }
}

impl ServerSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// 默认过滤级别，RUST_LOG 优先
    pub level: String,
    pub console: bool,
    pub file_enabled: bool,
    pub dir: PathBuf,
    /// 日志文件名前缀（按天滚动）
    pub file_prefix: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file_enabled: false,
            dir: PathBuf::from("logs"),
            file_prefix: "argus_pilot.log".to_string(),
        }
    }
}

/// [plugins] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// 是否注册内置 mock_adapter
    pub builtin: bool,
    /// 适配器清单目录（`*.toml`），未设置时不读取
    pub manifest_dir: Option<PathBuf>,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            builtin: true,
            manifest_dir: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ARGUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 ARGUS__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    if let Some(name) = default_names
        .into_iter()
        .find(|name| std::path::Path::new(&format!("{name}.toml")).exists())
    {
        builder = builder.add_source(config::File::with_name(name).required(false));
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARGUS")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
