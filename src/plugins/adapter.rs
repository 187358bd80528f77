//! 适配器能力接口：Perception（读取 UI 状态）与 Action（执行 UI 操作）
//!
//! 插件实现这两个 trait 之一或全部；宿主只通过 trait 对象调用插件代码。
//! 所有方法都取 `&self`，实例由 Pool 以 `Arc` 共享给多个 RPC 工作线程，内部可变性由插件自己负责。

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 通用配置映射（RPC 与配置文件中的 generic value map）
pub type ConfigMap = serde_json::Map<String, Value>;

/// 插件代码返回的错误
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("close failed: {0}")]
    Close(String),

    /// 插件 panic 或其它未声明的失败
    #[error("unexpected adapter failure: {0}")]
    Unexpected(String),
}

/// 适配器私有的元素标识（对宿主不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// UI 元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: ElementId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub attributes: ConfigMap,
}

impl UiElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ElementId::new(id),
            name: None,
            role: None,
            text: None,
            bounds: None,
            attributes: ConfigMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// 一次感知得到的界面快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSnapshot {
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub application: Option<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub elements: Vec<UiElement>,
}

impl UiSnapshot {
    pub fn new(window_title: impl Into<String>) -> Self {
        Self {
            window_title: window_title.into(),
            application: None,
            captured_at: Utc::now(),
            elements: Vec::new(),
        }
    }
}

/// 元素查询：strategy 由适配器解释（xpath / name / role ...）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementQuery {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub criteria: ConfigMap,
}

fn default_strategy() -> String {
    "xpath".to_string()
}

fn default_max_results() -> u32 {
    1
}

impl ElementQuery {
    pub fn new(strategy: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            query: query.into(),
            max_results: default_max_results(),
            criteria: ConfigMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Action 调用结果：适配器自己报告的成功 / 失败，不是宿主异常
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: ConfigMap,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: ConfigMap::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: ConfigMap::new(),
        }
    }
}

/// 感知能力
#[async_trait]
pub trait PerceptionAdapter: Send + Sync {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError>;

    async fn get_ui_snapshot(&self, options: &ConfigMap) -> Result<UiSnapshot, AdapterError>;

    async fn find_element(&self, query: &ElementQuery) -> Result<Option<UiElement>, AdapterError>;

    async fn find_elements(&self, query: &ElementQuery) -> Result<Vec<UiElement>, AdapterError>;

    async fn get_element_state(&self, element_id: &ElementId) -> Result<ConfigMap, AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "get_element_state({element_id})"
        )))
    }

    async fn get_element_text(&self, element_id: &ElementId)
        -> Result<Option<String>, AdapterError>;

    async fn get_focused_element(&self) -> Result<Option<UiElement>, AdapterError> {
        Err(AdapterError::Unsupported("get_focused_element".to_string()))
    }

    async fn close(&self) -> Result<(), AdapterError>;
}

/// 行动能力
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError>;

    async fn click(&self, element_id: &ElementId, options: &ConfigMap)
        -> Result<ActionResult, AdapterError>;

    /// element_id 为空时向当前焦点输入
    async fn type_text(
        &self,
        text: &str,
        element_id: Option<&ElementId>,
        options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError>;

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: i32,
        element_id: Option<&ElementId>,
        options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError>;

    async fn press_key(&self, key_combination: &str, options: &ConfigMap)
        -> Result<ActionResult, AdapterError>;

    async fn drag_and_drop(
        &self,
        source: &ElementId,
        target: DropTarget,
        options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        let _ = (source, target, options);
        Err(AdapterError::Unsupported("drag_and_drop".to_string()))
    }

    async fn execute_native_command(&self, command_name: &str, params: &ConfigMap)
        -> Result<ActionResult, AdapterError> {
        let _ = params;
        Err(AdapterError::Unsupported(format!(
            "execute_native_command({command_name})"
        )))
    }

    async fn close(&self) -> Result<(), AdapterError>;
}

/// 拖放目标：另一个元素或屏幕坐标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropTarget {
    Element(ElementId),
    Coordinates(Coordinates),
}

/// 构造插件实例的工厂（由 AdapterCatalog 在进程初始化时注册）
pub type PerceptionFactory = Arc<dyn Fn() -> Box<dyn PerceptionAdapter> + Send + Sync>;
pub type ActionFactory = Arc<dyn Fn() -> Box<dyn ActionAdapter> + Send + Sync>;

/// 从 panic payload 中取出可读信息
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// 执行一次插件调用，插件 panic 时转为 `AdapterError::Unexpected`
pub async fn contain<T, F>(call: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(AdapterError::Unexpected(format!(
            "adapter panicked: {}",
            panic_message(payload)
        ))),
    }
}

/// 同步版本，用于调用工厂函数
pub fn contain_sync<T>(f: impl FnOnce() -> T) -> Result<T, AdapterError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        AdapterError::Unexpected(format!("adapter panicked: {}", panic_message(payload)))
    })
}
