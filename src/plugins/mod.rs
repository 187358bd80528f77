//! 适配器插件系统
//!
//! - **adapter**: Perception / Action 能力接口与数据类型
//! - **catalog**: 符号路径 → 工厂的目录
//! - **source**: 候选插件来源（静态 / TOML 清单）
//! - **registry**: 发现与注册
//! - **pool**: 按应用名懒加载、缓存与卸载实例对
//! - **mock**: 内置 mock_adapter

pub mod adapter;
pub mod catalog;
pub mod mock;
pub mod pool;
pub mod registry;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapter::{
    ActionAdapter, ActionResult, AdapterError, ConfigMap, DropTarget, ElementId, ElementQuery,
    PerceptionAdapter, ScrollDirection, UiElement, UiSnapshot,
};
pub use catalog::{AdapterCatalog, CapabilityKind};
pub use pool::{AdapterConfig, AdapterInstancePair, AdapterInstancePool, CloseError, PoolError, UnloadReport};
pub use registry::{AdapterDescriptor, PluginRegistry, RegistrationError};
pub use source::{ManifestPluginSource, PluginCandidate, PluginSource, StaticPluginSource};
