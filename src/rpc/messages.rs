//! RPC 请求 / 响应消息（JSON）
//!
//! Perception / Action 请求都带可选的 `target_app`；缺省时使用最近一次 Initialize 成功的适配器。

use serde::{Deserialize, Serialize};

use crate::core::{EngineState, TaskOutcome};
use crate::plugins::{ConfigMap, DropTarget, ElementId, ElementQuery, ScrollDirection, UiElement};

/// 通用的成功 / 失败应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ---------- AdapterControl ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub adapter_name: String,
    /// `{"perception": {...}, "action": {...}}`；为空时使用配置文件中的 `[adapters.<name>]`
    #[serde(default)]
    pub config: ConfigMap,
}

// ---------- Perception ----------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    #[serde(default)]
    pub options: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindElementRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    #[serde(flatten)]
    pub query: ElementQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub element_id: ElementId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    #[serde(default)]
    pub target_app: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementResponse {
    pub element: Option<UiElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementsResponse {
    pub elements: Vec<UiElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStateResponse {
    pub state: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementTextResponse {
    pub text: Option<String>,
}

// ---------- Action ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub element_id: ElementId,
    #[serde(default)]
    pub options: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeTextRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub text: String,
    #[serde(default)]
    pub element_id: Option<ElementId>,
    #[serde(default)]
    pub options: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub direction: ScrollDirection,
    #[serde(default = "default_magnitude")]
    pub magnitude: i32,
    #[serde(default)]
    pub element_id: Option<ElementId>,
    #[serde(default)]
    pub options: ConfigMap,
}

fn default_magnitude() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressKeyRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub key_combination: String,
    #[serde(default)]
    pub options: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragAndDropRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub source_element_id: ElementId,
    pub target: DropTarget,
    #[serde(default)]
    pub options: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCommandRequest {
    #[serde(default)]
    pub target_app: Option<String>,
    pub command_name: String,
    #[serde(default)]
    pub params: ConfigMap,
}

// ---------- Engine ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatusResponse {
    pub state: EngineState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub description: String,
    pub target_app: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTaskResponse {
    pub success: bool,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptersResponse {
    pub registered: Vec<String>,
    pub loaded: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_find_request_flattens_query() {
        let req: FindElementRequest = serde_json::from_value(json!({
            "target_app": "notepad",
            "query": "OK",
            "strategy": "name"
        }))
        .unwrap();
        assert_eq!(req.target_app.as_deref(), Some("notepad"));
        assert_eq!(req.query.query, "OK");
        assert_eq!(req.query.max_results, 1);
    }

    #[test]
    fn test_structured_values_survive_exactly() {
        let original = json!({
            "text": "héllo",
            "int": 42,
            "float": 1.5,
            "flag": false,
            "nothing": null,
            "list": [1, "two", [3.0], {"four": 4}],
            "nested": {"deep": {"deeper": [true, null]}}
        });
        let req = NativeCommandRequest {
            target_app: None,
            command_name: "cmd".into(),
            params: original.as_object().unwrap().clone(),
        };
        let wire = serde_json::to_string(&req).unwrap();
        let back: NativeCommandRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(serde_json::Value::Object(back.params), original);
    }
}
