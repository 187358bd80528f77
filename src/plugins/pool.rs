//! 适配器实例池：按应用名懒加载并缓存 (perception, action) 实例对
//!
//! - 首次 get 时依次初始化 perception、action（fail-fast），全部成功才写入缓存
//! - 同名并发 get 共享同一次进行中的初始化，不会重复初始化
//! - unload 先移出缓存再分别 close，close 失败只记录
//!
//! 锁只保护缓存表本身，调用插件代码（initialize / close）时从不持锁。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::adapter::{contain, contain_sync, ActionAdapter, AdapterError, ConfigMap, PerceptionAdapter};
use super::catalog::CapabilityKind;
use super::registry::{AdapterDescriptor, PluginRegistry};

/// 传给一个适配器对的配置；缺失的一侧默认为空映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub perception: ConfigMap,
    #[serde(default)]
    pub action: ConfigMap,
}

impl AdapterConfig {
    /// 从 RPC 的通用映射构造（只取 perception / action 两个键）
    pub fn from_map(map: ConfigMap) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(map))
    }
}

/// 已加载的适配器实例对；任一侧都可能为空
pub struct AdapterInstancePair {
    pub name: String,
    pub perception: Option<Arc<dyn PerceptionAdapter>>,
    pub action: Option<Arc<dyn ActionAdapter>>,
}

impl AdapterInstancePair {
    /// 缺失的能力（用于判断是否可执行任务）
    pub fn missing(&self) -> Option<CapabilityKind> {
        if self.perception.is_none() {
            Some(CapabilityKind::Perception)
        } else if self.action.is_none() {
            Some(CapabilityKind::Action)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for AdapterInstancePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterInstancePair")
            .field("name", &self.name)
            .field("perception", &self.perception.is_some())
            .field("action", &self.action.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("adapter '{0}' is not registered")]
    NotRegistered(String),

    #[error("failed to initialize adapter '{name}': {cause}")]
    Initialization {
        name: String,
        #[source]
        cause: Arc<AdapterError>,
    },
}

impl PoolError {
    fn initialization(name: &str, cause: AdapterError) -> Self {
        Self::Initialization {
            name: name.to_string(),
            cause: Arc::new(cause),
        }
    }
}

/// close 失败（只记录，不抛出）
#[derive(Debug, Clone, PartialEq)]
pub struct CloseError {
    pub capability: CapabilityKind,
    pub message: String,
}

/// 一次 unload 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct UnloadReport {
    pub name: String,
    pub was_loaded: bool,
    pub close_errors: Vec<CloseError>,
}

type LoadOutcome = Result<Arc<AdapterInstancePair>, PoolError>;

enum Slot {
    /// 有调用方正在初始化；其它调用方等待同一结果
    Loading(watch::Receiver<Option<LoadOutcome>>),
    /// 第二个字段是加载序号，用于按加载顺序列出
    Ready(Arc<AdapterInstancePair>, u64),
}

enum Claim {
    Wait(watch::Receiver<Option<LoadOutcome>>),
    Load(Arc<AdapterDescriptor>, watch::Sender<Option<LoadOutcome>>),
}

/// 适配器实例池
pub struct AdapterInstancePool {
    registry: Arc<PluginRegistry>,
    slots: Mutex<HashMap<String, Slot>>,
    next_seq: AtomicU64,
}

impl AdapterInstancePool {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            slots: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// 获取（必要时加载）指定名字的适配器对；已缓存时原样返回，不会再次初始化
    pub async fn get(&self, name: &str, config: &AdapterConfig) -> Result<Arc<AdapterInstancePair>, PoolError> {
        let claim = {
            let mut slots = self.lock_slots();
            match slots.get(name) {
                Some(Slot::Ready(pair, _)) => {
                    tracing::debug!(adapter = name, "Returning cached adapter instance");
                    return Ok(Arc::clone(pair));
                }
                Some(Slot::Loading(rx)) => Claim::Wait(rx.clone()),
                None => match self.registry.resolve(name) {
                    Some(descriptor) => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(name.to_string(), Slot::Loading(rx));
                        Claim::Load(descriptor, tx)
                    }
                    None => {
                        tracing::error!(adapter = name, "No registered adapter found for application");
                        return Err(PoolError::NotRegistered(name.to_string()));
                    }
                },
            }
        };
        let (descriptor, sender) = match claim {
            Claim::Wait(rx) => {
                tracing::debug!(adapter = name, "Waiting for in-flight adapter initialization");
                return Self::wait_for(name, rx).await;
            }
            Claim::Load(descriptor, tx) => (descriptor, tx),
        };

        let mut guard = LoadingGuard {
            slots: &self.slots,
            name,
            armed: true,
        };
        tracing::info!(adapter = name, "Loading and initializing adapter...");
        let outcome = Self::instantiate(&descriptor, config).await.map(Arc::new);

        {
            let mut slots = self.lock_slots();
            match &outcome {
                Ok(pair) => {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                    slots.insert(name.to_string(), Slot::Ready(Arc::clone(pair), seq));
                    tracing::info!(adapter = name, "Successfully loaded adapter pair");
                }
                Err(e) => {
                    slots.remove(name);
                    tracing::error!(adapter = name, error = %e, "Adapter initialization failed");
                }
            }
        }
        guard.armed = false;
        let _ = sender.send(Some(outcome.clone()));
        outcome
    }

    async fn wait_for(name: &str, mut rx: watch::Receiver<Option<LoadOutcome>>) -> LoadOutcome {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(PoolError::NotRegistered(name.to_string()))),
            Err(_) => Err(PoolError::initialization(
                name,
                AdapterError::Unexpected("initialization was abandoned".to_string()),
            )),
        }
    }

    /// 依次初始化 perception、action；任一步失败立即返回，已初始化的 perception 直接丢弃（不 close）
    async fn instantiate(descriptor: &AdapterDescriptor, config: &AdapterConfig) -> Result<AdapterInstancePair, PoolError> {
        let name = descriptor.name.as_str();
        let fail = |cause| PoolError::initialization(name, cause);

        let perception: Option<Arc<dyn PerceptionAdapter>> = match &descriptor.perception {
            Some(factory) => {
                let instance: Arc<dyn PerceptionAdapter> = Arc::from(contain_sync(|| factory()).map_err(fail)?);
                contain(instance.initialize(&config.perception)).await.map_err(fail)?;
                tracing::debug!(adapter = name, "Initialized perception adapter");
                Some(instance)
            }
            None => {
                tracing::debug!(adapter = name, "No perception adapter class registered");
                None
            }
        };

        let action: Option<Arc<dyn ActionAdapter>> = match &descriptor.action {
            Some(factory) => {
                let instance: Arc<dyn ActionAdapter> = Arc::from(contain_sync(|| factory()).map_err(fail)?);
                contain(instance.initialize(&config.action)).await.map_err(fail)?;
                tracing::debug!(adapter = name, "Initialized action adapter");
                Some(instance)
            }
            None => {
                tracing::debug!(adapter = name, "No action adapter class registered");
                None
            }
        };

        Ok(AdapterInstancePair {
            name: name.to_string(),
            perception,
            action,
        })
    }

    /// 卸载：先移出缓存，再分别 close 两侧；未加载时只记录警告
    pub async fn unload(&self, name: &str) -> UnloadReport {
        let removed = {
            let mut slots = self.lock_slots();
            match slots.get(name) {
                Some(Slot::Ready(..)) => match slots.remove(name) {
                    Some(Slot::Ready(pair, _)) => Some(pair),
                    _ => None,
                },
                _ => None,
            }
        };
        let Some(pair) = removed else {
            tracing::warn!(adapter = name, "Attempted to unload adapter, but it was not loaded");
            return UnloadReport {
                name: name.to_string(),
                was_loaded: false,
                close_errors: Vec::new(),
            };
        };

        tracing::info!(adapter = name, "Unloading adapter...");
        let mut close_errors = Vec::new();
        if let Some(perception) = &pair.perception {
            tracing::debug!(adapter = name, "Closing perception adapter");
            if let Err(e) = contain(perception.close()).await {
                tracing::error!(adapter = name, error = %e, "Error closing perception adapter");
                close_errors.push(CloseError {
                    capability: CapabilityKind::Perception,
                    message: e.to_string(),
                });
            }
        }
        if let Some(action) = &pair.action {
            tracing::debug!(adapter = name, "Closing action adapter");
            if let Err(e) = contain(action.close()).await {
                tracing::error!(adapter = name, error = %e, "Error closing action adapter");
                close_errors.push(CloseError {
                    capability: CapabilityKind::Action,
                    message: e.to_string(),
                });
            }
        }
        tracing::info!(adapter = name, "Unloaded adapter");

        UnloadReport {
            name: name.to_string(),
            was_loaded: true,
            close_errors,
        }
    }

    /// 按加载顺序卸载全部已加载适配器（先对名字做快照）
    pub async fn unload_all(&self) -> Vec<UnloadReport> {
        let names = self.list_loaded();
        tracing::info!(count = names.len(), "Unloading all loaded adapters...");
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.unload(&name).await);
        }
        tracing::info!("Finished unloading all adapters");
        reports
    }

    /// 已加载（初始化完成）的名字，按加载顺序；卸载后重新加载的排在最后
    pub fn list_loaded(&self) -> Vec<String> {
        let slots = self.lock_slots();
        let mut loaded: Vec<(u64, &String)> = slots
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Ready(_, seq) => Some((*seq, name)),
                Slot::Loading(_) => None,
            })
            .collect();
        loaded.sort_unstable_by_key(|(seq, _)| *seq);
        loaded.into_iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn list_registered(&self) -> Vec<String> {
        self.registry.list_names()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        matches!(self.lock_slots().get(name), Some(Slot::Ready(..)))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.is_registered(name)
    }

    /// 已加载的实例对（不触发加载）
    pub fn loaded(&self, name: &str) -> Option<Arc<AdapterInstancePair>> {
        match self.lock_slots().get(name) {
            Some(Slot::Ready(pair, _)) => Some(Arc::clone(pair)),
            _ => None,
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 初始化 future 被取消时清理残留的 Loading 槽位
struct LoadingGuard<'a> {
    slots: &'a Mutex<HashMap<String, Slot>>,
    name: &'a str,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(slots.get(self.name), Some(Slot::Loading(_))) {
            slots.remove(self.name);
            tracing::warn!(adapter = self.name, "Adapter initialization abandoned before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::plugins::catalog::AdapterCatalog;
    use crate::plugins::source::StaticPluginSource;
    use crate::plugins::test_support::{both, FakeSet, Recorder};

    struct Fixture {
        pool: AdapterInstancePool,
        sets: HashMap<String, FakeSet>,
    }

    /// 每个名字一组独立的假适配器
    fn fixture(entries: &[(&str, serde_json::Value)]) -> Fixture {
        let mut catalog = AdapterCatalog::new();
        let mut source = StaticPluginSource::new("test");
        let mut sets = HashMap::new();
        for (name, declaration) in entries {
            let set = FakeSet::new();
            set.register(&mut catalog, name);
            sets.insert(name.to_string(), set);
            source = source.with(*name, declaration.clone());
        }
        let registry = PluginRegistry::new(catalog).with_source(source);
        registry.discover();
        Fixture {
            pool: AdapterInstancePool::new(Arc::new(registry)),
            sets,
        }
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let f = fixture(&[("alpha", both("alpha"))]);
        let first = f.pool.get("alpha", &AdapterConfig::default()).await.unwrap();
        let second = f.pool.get("alpha", &AdapterConfig::default()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.sets["alpha"].perception.inits(), 1);
        assert_eq!(f.sets["alpha"].action.inits(), 1);
    }

    #[tokio::test]
    async fn test_perception_only_adapter() {
        let f = fixture(&[("beta", json!({"perception": "beta:Perception"}))]);
        let pair = f.pool.get("beta", &AdapterConfig::default()).await.unwrap();

        assert!(pair.perception.is_some());
        assert!(pair.action.is_none());
        assert_eq!(pair.missing(), Some(CapabilityKind::Action));
        assert!(f.pool.is_loaded("beta"));
    }

    #[tokio::test]
    async fn test_action_init_failure_caches_nothing() {
        let f = fixture(&[("gamma", both("gamma"))]);
        let set = &f.sets["gamma"];
        Recorder::set(&set.action.fail_init, true);

        let err = f.pool.get("gamma", &AdapterConfig::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::Initialization { ref name, .. } if name == "gamma"));
        assert!(!f.pool.is_loaded("gamma"));
        assert_eq!(set.perception.inits(), 1);
        assert_eq!(set.perception.closes(), 0, "discarded perception is not closed");

        // 再次 get 从头重试，而不是重放失败
        Recorder::set(&set.action.fail_init, false);
        let pair = f.pool.get("gamma", &AdapterConfig::default()).await.unwrap();
        assert!(pair.action.is_some());
        assert_eq!(set.perception.inits(), 2);
        assert_eq!(set.action.inits(), 2);
    }

    #[tokio::test]
    async fn test_perception_failure_skips_action() {
        let f = fixture(&[("delta", both("delta"))]);
        let set = &f.sets["delta"];
        Recorder::set(&set.perception.fail_init, true);

        assert!(f.pool.get("delta", &AdapterConfig::default()).await.is_err());
        assert_eq!(set.action.inits(), 0);
    }

    #[tokio::test]
    async fn test_panic_during_initialize_is_wrapped() {
        let f = fixture(&[("eps", both("eps"))]);
        Recorder::set(&f.sets["eps"].perception.panic_init, true);

        match f.pool.get("eps", &AdapterConfig::default()).await {
            Err(PoolError::Initialization { cause, .. }) => {
                assert!(matches!(*cause, AdapterError::Unexpected(_)));
            }
            other => panic!("expected Initialization error, got {other:?}"),
        }
        assert!(!f.pool.is_loaded("eps"));
    }

    #[tokio::test]
    async fn test_unregistered_lookup() {
        let f = fixture(&[("alpha", both("alpha"))]);
        let err = f.pool.get("nonexistent", &AdapterConfig::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::NotRegistered(ref n) if n == "nonexistent"));
        assert!(f.pool.list_loaded().is_empty());
    }

    #[tokio::test]
    async fn test_config_sides_are_passed_separately() {
        let f = fixture(&[("alpha", both("alpha"))]);
        let config = AdapterConfig::from_map(
            json!({"perception": {"api_key": "123"}, "unrelated": true})
                .as_object()
                .unwrap()
                .clone(),
        )
        .unwrap();
        f.pool.get("alpha", &config).await.unwrap();

        let set = &f.sets["alpha"];
        let p = set.perception.last_config.lock().unwrap().clone().unwrap();
        let a = set.action.last_config.lock().unwrap().clone().unwrap();
        assert_eq!(p.get("api_key"), Some(&json!("123")));
        assert!(a.is_empty());
    }

    #[tokio::test]
    async fn test_double_unload_is_noop() {
        let f = fixture(&[("alpha", both("alpha"))]);
        let report = f.pool.unload("alpha").await;
        assert!(!report.was_loaded);

        f.pool.get("alpha", &AdapterConfig::default()).await.unwrap();
        assert!(f.pool.unload("alpha").await.was_loaded);
        assert!(!f.pool.unload("alpha").await.was_loaded);
        assert_eq!(f.sets["alpha"].perception.closes(), 1);
        assert_eq!(f.sets["alpha"].action.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_block_other_close() {
        let f = fixture(&[("alpha", both("alpha"))]);
        f.pool.get("alpha", &AdapterConfig::default()).await.unwrap();
        Recorder::set(&f.sets["alpha"].perception.fail_close, true);

        let report = f.pool.unload("alpha").await;
        assert_eq!(report.close_errors.len(), 1);
        assert_eq!(report.close_errors[0].capability, CapabilityKind::Perception);
        assert_eq!(f.sets["alpha"].action.closes(), 1);
        assert!(!f.pool.is_loaded("alpha"));
    }

    #[tokio::test]
    async fn test_unload_all_is_resilient() {
        let f = fixture(&[("a", both("a")), ("b", both("b")), ("c", both("c"))]);
        for name in ["a", "b", "c"] {
            f.pool.get(name, &AdapterConfig::default()).await.unwrap();
        }
        f.sets["b"].action.fail_close.store(true, Ordering::SeqCst);

        let reports = f.pool.unload_all().await;
        assert!(f.pool.list_loaded().is_empty());
        let errors: usize = reports.iter().map(|r| r.close_errors.len()).sum();
        assert_eq!(errors, 1);
        assert_eq!(reports.iter().find(|r| !r.close_errors.is_empty()).unwrap().name, "b");
    }

    #[tokio::test]
    async fn test_unload_all_follows_load_order() {
        let f = fixture(&[("a", both("a")), ("b", both("b")), ("c", both("c"))]);
        for name in ["c", "a", "b"] {
            f.pool.get(name, &AdapterConfig::default()).await.unwrap();
        }
        assert_eq!(f.pool.list_loaded(), vec!["c", "a", "b"]);

        // 重新加载的排到最后
        f.pool.unload("a").await;
        f.pool.get("a", &AdapterConfig::default()).await.unwrap();
        assert_eq!(f.pool.list_loaded(), vec!["c", "b", "a"]);

        let order: Vec<String> = f.pool.unload_all().await.into_iter().map(|r| r.name).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_concurrent_get_initializes_once() {
        let f = Arc::new(fixture(&[("slow", both("slow"))]));
        f.sets["slow"].perception.init_delay_ms.store(50, Ordering::SeqCst);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = Arc::clone(&f);
            handles.push(tokio::spawn(async move {
                f.pool.get("slow", &AdapterConfig::default()).await.unwrap()
            }));
        }
        let mut pairs = Vec::new();
        for h in handles {
            pairs.push(h.await.unwrap());
        }

        assert!(pairs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(f.sets["slow"].perception.inits(), 1);
        assert_eq!(f.sets["slow"].action.inits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_failure() {
        let f = Arc::new(fixture(&[("flaky", both("flaky"))]));
        let set = &f.sets["flaky"];
        set.perception.init_delay_ms.store(50, Ordering::SeqCst);
        Recorder::set(&set.perception.fail_init, true);

        let a = {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.pool.get("flaky", &AdapterConfig::default()).await })
        };
        let b = {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.pool.get("flaky", &AdapterConfig::default()).await })
        };
        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert_eq!(set.perception.inits(), 1);
        assert!(!f.pool.is_loaded("flaky"));
    }

    #[tokio::test]
    async fn test_cancelled_initialization_clears_slot() {
        let f = fixture(&[("slow", both("slow"))]);
        f.sets["slow"].perception.init_delay_ms.store(200, Ordering::SeqCst);

        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            f.pool.get("slow", &AdapterConfig::default()),
        )
        .await;
        assert!(attempt.is_err());
        assert!(!f.pool.is_loaded("slow"));

        f.sets["slow"].perception.init_delay_ms.store(0, Ordering::SeqCst);
        assert!(f.pool.get("slow", &AdapterConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_queries() {
        let f = fixture(&[("a", both("a")), ("b", both("b"))]);
        f.pool.get("b", &AdapterConfig::default()).await.unwrap();

        assert_eq!(f.pool.list_registered(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(f.pool.list_loaded(), vec!["b".to_string()]);
        assert!(f.pool.is_registered("a"));
        assert!(!f.pool.is_loaded("a"));
        assert!(f.pool.loaded("b").is_some());
        assert!(f.pool.loaded("a").is_none());
    }
}
