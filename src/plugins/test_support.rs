//! 单元测试用的可观测假适配器

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::adapter::*;
use super::catalog::AdapterCatalog;

/// 记录调用次数并控制失败行为
#[derive(Default)]
pub struct Recorder {
    pub init_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub action_calls: AtomicUsize,
    pub fail_init: AtomicBool,
    pub panic_init: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_snapshot: AtomicBool,
    /// close() 永不返回
    pub hang_close: AtomicBool,
    pub init_delay_ms: AtomicU64,
    pub last_config: Mutex<Option<ConfigMap>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inits(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    async fn on_initialize(&self, config: &ConfigMap) -> Result<(), AdapterError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        *self.last_config.lock().unwrap() = Some(config.clone());
        if self.panic_init.load(Ordering::SeqCst) {
            panic!("fake adapter panicked during initialize");
        }
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(AdapterError::Initialization("fake init failure".into()));
        }
        Ok(())
    }

    async fn on_close(&self) -> Result<(), AdapterError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(AdapterError::Close("fake close failure".into()));
        }
        Ok(())
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct FakePerception {
    pub recorder: Arc<Recorder>,
    pub on_snapshot: Option<Hook>,
}

#[async_trait]
impl PerceptionAdapter for FakePerception {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError> {
        self.recorder.on_initialize(config).await
    }

    async fn get_ui_snapshot(&self, _options: &ConfigMap) -> Result<UiSnapshot, AdapterError> {
        self.recorder.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_snapshot {
            hook();
        }
        if self.recorder.fail_snapshot.load(Ordering::SeqCst) {
            return Err(AdapterError::Operation("fake snapshot failure".into()));
        }
        let mut snapshot = UiSnapshot::new("Fake Window");
        snapshot.elements.push(UiElement::new("ok-button").with_name("OK").with_role("button"));
        Ok(snapshot)
    }

    async fn find_element(&self, query: &ElementQuery) -> Result<Option<UiElement>, AdapterError> {
        Ok(Some(UiElement::new(query.query.clone())))
    }

    async fn find_elements(&self, query: &ElementQuery) -> Result<Vec<UiElement>, AdapterError> {
        Ok(vec![UiElement::new(query.query.clone())])
    }

    async fn get_element_text(&self, element_id: &ElementId) -> Result<Option<String>, AdapterError> {
        Ok(Some(format!("text of {element_id}")))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.recorder.on_close().await
    }
}

#[derive(Clone, Default)]
pub struct FakeAction {
    pub recorder: Arc<Recorder>,
    pub on_action: Option<Hook>,
}

impl FakeAction {
    fn record(&self, what: &str) -> Result<ActionResult, AdapterError> {
        self.recorder.action_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_action {
            hook();
        }
        Ok(ActionResult::ok(what))
    }
}

#[async_trait]
impl ActionAdapter for FakeAction {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError> {
        self.recorder.on_initialize(config).await
    }

    async fn click(&self, element_id: &ElementId, _options: &ConfigMap) -> Result<ActionResult, AdapterError> {
        self.record(&format!("clicked {element_id}"))
    }

    async fn type_text(
        &self,
        text: &str,
        _element_id: Option<&ElementId>,
        _options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        self.record(&format!("typed {text}"))
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: i32,
        _element_id: Option<&ElementId>,
        _options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        self.record(&format!("scrolled {direction:?} {magnitude}"))
    }

    async fn press_key(&self, key_combination: &str, _options: &ConfigMap) -> Result<ActionResult, AdapterError> {
        self.record(&format!("pressed {key_combination}"))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.recorder.on_close().await
    }
}

/// 一组共享探针的假适配器，登记在 `<module>:Perception` 与 `<module>:Action`
#[derive(Clone)]
pub struct FakeSet {
    pub perception: Arc<Recorder>,
    pub action: Arc<Recorder>,
    pub on_snapshot: Option<Hook>,
    pub on_action: Option<Hook>,
}

impl FakeSet {
    pub fn new() -> Self {
        Self {
            perception: Recorder::new(),
            action: Recorder::new(),
            on_snapshot: None,
            on_action: None,
        }
    }

    pub fn register(&self, catalog: &mut AdapterCatalog, module: &str) {
        let recorder = Arc::clone(&self.perception);
        let hook = self.on_snapshot.clone();
        catalog
            .register_perception(&format!("{module}:Perception"), move || FakePerception {
                recorder: Arc::clone(&recorder),
                on_snapshot: hook.clone(),
            })
            .unwrap();
        let recorder = Arc::clone(&self.action);
        let hook = self.on_action.clone();
        catalog
            .register_action(&format!("{module}:Action"), move || FakeAction {
                recorder: Arc::clone(&recorder),
                on_action: hook.clone(),
            })
            .unwrap();
    }
}

/// 只含 `fake:Perception` / `fake:Action` 的目录
pub fn fake_catalog() -> AdapterCatalog {
    let mut catalog = AdapterCatalog::new();
    FakeSet::new().register(&mut catalog, "fake");
    catalog
}

/// 声明 `<module>:Perception` 与 `<module>:Action`
pub fn both(module: &str) -> serde_json::Value {
    serde_json::json!({
        "perception": format!("{module}:Perception"),
        "action": format!("{module}:Action"),
    })
}
