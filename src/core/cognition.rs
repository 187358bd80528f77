//! Cognition：根据任务描述与界面快照规划动作
//!
//! 引擎只依赖这个 trait；默认的 NoopCognition 不规划任何动作。
//! PlannedAction 序列化为 `{"action": "click", "element_id": "..."}` 形式，便于外部规划器直接产出 JSON。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::plugins::{ActionAdapter, ActionResult, AdapterError, ConfigMap, DropTarget, ElementId, ScrollDirection, UiSnapshot};

/// 一个待执行的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Click {
        element_id: ElementId,
        #[serde(default)]
        options: ConfigMap,
    },
    TypeText {
        text: String,
        #[serde(default)]
        element_id: Option<ElementId>,
        #[serde(default)]
        options: ConfigMap,
    },
    Scroll {
        direction: ScrollDirection,
        magnitude: i32,
        #[serde(default)]
        element_id: Option<ElementId>,
        #[serde(default)]
        options: ConfigMap,
    },
    PressKey {
        key_combination: String,
        #[serde(default)]
        options: ConfigMap,
    },
    DragAndDrop {
        source: ElementId,
        target: DropTarget,
        #[serde(default)]
        options: ConfigMap,
    },
    NativeCommand {
        command_name: String,
        #[serde(default)]
        params: ConfigMap,
    },
}

impl PlannedAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::Scroll { .. } => "scroll",
            Self::PressKey { .. } => "press_key",
            Self::DragAndDrop { .. } => "drag_and_drop",
            Self::NativeCommand { .. } => "native_command",
        }
    }

    /// 交给行动适配器执行
    pub async fn dispatch(&self, adapter: &dyn ActionAdapter) -> Result<ActionResult, AdapterError> {
        match self {
            Self::Click { element_id, options } => adapter.click(element_id, options).await,
            Self::TypeText {
                text,
                element_id,
                options,
            } => adapter.type_text(text, element_id.as_ref(), options).await,
            Self::Scroll {
                direction,
                magnitude,
                element_id,
                options,
            } => {
                adapter
                    .scroll(*direction, *magnitude, element_id.as_ref(), options)
                    .await
            }
            Self::PressKey {
                key_combination,
                options,
            } => adapter.press_key(key_combination, options).await,
            Self::DragAndDrop { source, target, options } => {
                adapter.drag_and_drop(source, target.clone(), options).await
            }
            Self::NativeCommand { command_name, params } => {
                adapter.execute_native_command(command_name, params).await
            }
        }
    }
}

/// 规划器接口
#[async_trait]
pub trait Cognition: Send + Sync {
    async fn plan(&self, task: &str, snapshot: &UiSnapshot) -> Result<Vec<PlannedAction>, AdapterError>;
}

/// 不做任何规划
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCognition;

#[async_trait]
impl Cognition for NoopCognition {
    async fn plan(&self, task: &str, snapshot: &UiSnapshot) -> Result<Vec<PlannedAction>, AdapterError> {
        tracing::debug!(
            task,
            window = %snapshot.window_title,
            elements = snapshot.elements.len(),
            "NoopCognition: no actions planned"
        );
        Ok(Vec::new())
    }
}
