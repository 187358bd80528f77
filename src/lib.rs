//! Argus - 通过可插拔适配器驱动外部应用的自动化控制宿主
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 引擎状态机、任务编排（Perception → Cognition → Action）、运行时组装、优雅关闭
//! - **observability**: 日志初始化
//! - **plugins**: 适配器接口、目录、发现、实例池
//! - **rpc**: JSON over HTTP 服务端与客户端

pub mod config;
pub mod core;
pub mod observability;
pub mod plugins;
pub mod rpc;

pub use crate::core::{CoreEngine, EngineState, TaskOutcome};
pub use crate::plugins::{AdapterInstancePool, PluginRegistry};
