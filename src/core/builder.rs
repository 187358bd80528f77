//! 运行时构建器：从 AppConfig 组装 注册表 → 实例池 → 引擎
//!
//! RPC 服务、CLI 与集成测试共用同一套组装逻辑。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::cognition::{Cognition, NoopCognition};
use crate::core::engine::CoreEngine;
use crate::plugins::{
    AdapterCatalog, AdapterInstancePool, ManifestPluginSource, PluginRegistry, StaticPluginSource,
};

/// 运行时构建器
pub struct RuntimeBuilder {
    config: AppConfig,
    catalog: AdapterCatalog,
    extra_sources: Vec<StaticPluginSource>,
    cognition: Arc<dyn Cognition>,
}

impl RuntimeBuilder {
    /// 目录默认包含内置适配器
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            catalog: AdapterCatalog::builtin(),
            extra_sources: Vec::new(),
            cognition: Arc::new(NoopCognition),
        }
    }

    /// 替换适配器目录（嵌入方注册自己的工厂）
    pub fn with_catalog(mut self, catalog: AdapterCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// 追加一个内存来源
    pub fn with_source(mut self, source: StaticPluginSource) -> Self {
        self.extra_sources.push(source);
        self
    }

    pub fn with_cognition(mut self, cognition: Arc<dyn Cognition>) -> Self {
        self.cognition = cognition;
        self
    }

    /// 构建注册表并执行一次发现
    pub fn build_registry(&self) -> PluginRegistry {
        let mut registry = PluginRegistry::new(self.catalog.clone());
        if self.config.plugins.builtin {
            registry = registry.with_source(StaticPluginSource::builtin());
        }
        if let Some(dir) = &self.config.plugins.manifest_dir {
            registry = registry.with_source(ManifestPluginSource::new(dir));
        }
        for source in &self.extra_sources {
            registry = registry.with_source(source.clone());
        }
        registry.discover();
        registry
    }

    pub fn build(self) -> Runtime {
        let registry = Arc::new(self.build_registry());
        let pool = Arc::new(AdapterInstancePool::new(Arc::clone(&registry)));
        let engine = Arc::new(
            CoreEngine::new(Arc::clone(&pool))
                .with_adapter_configs(self.config.adapters.clone())
                .with_cognition(self.cognition),
        );
        Runtime {
            config: self.config,
            registry,
            pool,
            engine,
        }
    }
}

/// 组装完成的运行时组件
#[derive(Clone)]
pub struct Runtime {
    pub config: AppConfig,
    pub registry: Arc<PluginRegistry>,
    pub pool: Arc<AdapterInstancePool>,
    pub engine: Arc<CoreEngine>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::plugins::mock::ADAPTER_NAME;
    use crate::plugins::test_support::{both, fake_catalog};
    use crate::plugins::AdapterConfig;

    #[test]
    fn test_default_runtime_has_mock_adapter() {
        let runtime = RuntimeBuilder::new(AppConfig::default()).build();
        assert_eq!(runtime.registry.list_names(), vec![ADAPTER_NAME.to_string()]);
        assert!(runtime.pool.list_loaded().is_empty());
    }

    #[test]
    fn test_builtin_can_be_disabled() {
        let mut config = AppConfig::default();
        config.plugins.builtin = false;
        let runtime = RuntimeBuilder::new(config)
            .with_source(StaticPluginSource::new("extra").with(
                "extra_app",
                json!({"perception": crate::plugins::mock::PERCEPTION_PATH}),
            ))
            .build();
        assert_eq!(runtime.registry.list_names(), vec!["extra_app".to_string()]);
    }

    #[tokio::test]
    async fn test_custom_catalog_replaces_builtin_factories() {
        let mut config = AppConfig::default();
        config.plugins.builtin = false;
        let runtime = RuntimeBuilder::new(config)
            .with_catalog(fake_catalog())
            .with_source(StaticPluginSource::new("embedded").with("fake_app", both("fake")))
            .build();
        assert_eq!(runtime.registry.list_names(), vec!["fake_app".to_string()]);

        let pair = runtime.pool.get("fake_app", &AdapterConfig::default()).await.unwrap();
        assert!(pair.missing().is_none());
        assert!(!runtime.registry.is_registered(ADAPTER_NAME));
    }

    #[test]
    fn test_manifest_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("apps.toml"),
            format!(
                "[adapters.notepad]\nperception = \"{}\"\naction = \"{}\"\n",
                crate::plugins::mock::PERCEPTION_PATH,
                crate::plugins::mock::ACTION_PATH
            ),
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.plugins.manifest_dir = Some(dir.path().to_path_buf());

        let registry = RuntimeBuilder::new(config).build_registry();
        assert_eq!(
            registry.list_names(),
            vec![ADAPTER_NAME.to_string(), "notepad".to_string()]
        );
    }
}
