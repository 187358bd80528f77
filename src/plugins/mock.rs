//! 内置 Mock 适配器（无需真实目标应用）
//!
//! 提供一个固定的 "Mock Window" 快照，动作一律成功并回显参数，便于本地跑通 RPC 与任务流程。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::adapter::*;
use super::catalog::AdapterCatalog;

pub const ADAPTER_NAME: &str = "mock_adapter";
pub const PERCEPTION_PATH: &str = "argus.adapters.mock:MockPerception";
pub const ACTION_PATH: &str = "argus.adapters.mock:MockAction";

/// mock_adapter 的插件声明
pub fn declaration() -> Value {
    json!({
        "perception": PERCEPTION_PATH,
        "action": ACTION_PATH,
    })
}

/// 把 Mock 工厂登记到目录
pub fn register(catalog: &mut AdapterCatalog) {
    if let Err(e) = catalog.register_perception(PERCEPTION_PATH, MockPerception::default) {
        tracing::error!(error = %e, "Failed to register mock perception adapter");
    }
    if let Err(e) = catalog.register_action(ACTION_PATH, MockAction::default) {
        tracing::error!(error = %e, "Failed to register mock action adapter");
    }
}

fn mock_elements() -> Vec<UiElement> {
    let mut input = UiElement::new("mock-input")
        .with_name("Search")
        .with_role("edit")
        .with_text("");
    input.bounds = Some(Bounds {
        x: 10.0,
        y: 10.0,
        width: 200.0,
        height: 24.0,
    });
    input.attributes.insert("focused".into(), json!(true));

    let mut button = UiElement::new("mock-button")
        .with_name("OK")
        .with_role("button")
        .with_text("OK");
    button.bounds = Some(Bounds {
        x: 220.0,
        y: 10.0,
        width: 60.0,
        height: 24.0,
    });
    button.attributes.insert("enabled".into(), json!(true));

    let label = UiElement::new("mock-label")
        .with_name("Status")
        .with_role("text")
        .with_text("Ready");

    vec![input, button, label]
}

fn matches(element: &UiElement, query: &str) -> bool {
    element.id.as_str() == query
        || element.name.as_deref() == Some(query)
        || element.text.as_deref() == Some(query)
}

#[derive(Debug, Default)]
pub struct MockPerception {
    initialized: AtomicBool,
}

impl MockPerception {
    fn ensure_initialized(&self) -> Result<(), AdapterError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Operation("mock perception adapter is not initialized".into()))
        }
    }
}

#[async_trait]
impl PerceptionAdapter for MockPerception {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError> {
        tracing::debug!(keys = config.len(), "MockPerception initialized");
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_ui_snapshot(&self, _options: &ConfigMap) -> Result<UiSnapshot, AdapterError> {
        self.ensure_initialized()?;
        let mut snapshot = UiSnapshot::new("Mock Window");
        snapshot.application = Some(ADAPTER_NAME.to_string());
        snapshot.elements = mock_elements();
        Ok(snapshot)
    }

    async fn find_element(&self, query: &ElementQuery) -> Result<Option<UiElement>, AdapterError> {
        self.ensure_initialized()?;
        Ok(mock_elements().into_iter().find(|e| matches(e, &query.query)))
    }

    async fn find_elements(&self, query: &ElementQuery) -> Result<Vec<UiElement>, AdapterError> {
        self.ensure_initialized()?;
        let limit = if query.max_results == 0 {
            usize::MAX
        } else {
            query.max_results as usize
        };
        Ok(mock_elements()
            .into_iter()
            .filter(|e| query.query.is_empty() || matches(e, &query.query))
            .take(limit)
            .collect())
    }

    async fn get_element_state(&self, element_id: &ElementId) -> Result<ConfigMap, AdapterError> {
        self.ensure_initialized()?;
        mock_elements()
            .into_iter()
            .find(|e| &e.id == element_id)
            .map(|e| e.attributes)
            .ok_or_else(|| AdapterError::Operation(format!("element {element_id} not found")))
    }

    async fn get_element_text(&self, element_id: &ElementId) -> Result<Option<String>, AdapterError> {
        self.ensure_initialized()?;
        Ok(mock_elements()
            .into_iter()
            .find(|e| &e.id == element_id)
            .and_then(|e| e.text))
    }

    async fn get_focused_element(&self) -> Result<Option<UiElement>, AdapterError> {
        self.ensure_initialized()?;
        Ok(mock_elements()
            .into_iter()
            .find(|e| e.attributes.get("focused") == Some(&json!(true))))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.initialized.store(false, Ordering::SeqCst);
        tracing::debug!("MockPerception closed");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockAction {
    initialized: AtomicBool,
}

impl MockAction {
    fn respond(&self, message: String) -> Result<ActionResult, AdapterError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(AdapterError::Operation("mock action adapter is not initialized".into()));
        }
        tracing::debug!(%message, "MockAction performed");
        Ok(ActionResult::ok(message))
    }
}

#[async_trait]
impl ActionAdapter for MockAction {
    async fn initialize(&self, config: &ConfigMap) -> Result<(), AdapterError> {
        tracing::debug!(keys = config.len(), "MockAction initialized");
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn click(&self, element_id: &ElementId, _options: &ConfigMap) -> Result<ActionResult, AdapterError> {
        self.respond(format!("Clicked {element_id}"))
    }

    async fn type_text(
        &self,
        text: &str,
        element_id: Option<&ElementId>,
        _options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        match element_id {
            Some(id) => self.respond(format!("Typed '{text}' into {id}")),
            None => self.respond(format!("Typed '{text}' into focused element")),
        }
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: i32,
        _element_id: Option<&ElementId>,
        _options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        self.respond(format!("Scrolled {direction:?} by {magnitude}"))
    }

    async fn press_key(&self, key_combination: &str, _options: &ConfigMap) -> Result<ActionResult, AdapterError> {
        self.respond(format!("Pressed {key_combination}"))
    }

    async fn drag_and_drop(
        &self,
        source: &ElementId,
        target: DropTarget,
        _options: &ConfigMap,
    ) -> Result<ActionResult, AdapterError> {
        match target {
            DropTarget::Element(id) => self.respond(format!("Dragged {source} onto {id}")),
            DropTarget::Coordinates(c) => self.respond(format!("Dragged {source} to ({}, {})", c.x, c.y)),
        }
    }

    async fn execute_native_command(&self, command_name: &str, params: &ConfigMap) -> Result<ActionResult, AdapterError> {
        let mut result = self.respond(format!("Executed native command {command_name}"))?;
        result.data = params.clone();
        Ok(result)
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.initialized.store(false, Ordering::SeqCst);
        tracing::debug!("MockAction closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_perception_requires_initialize() {
        let p = MockPerception::default();
        assert!(p.get_ui_snapshot(&ConfigMap::new()).await.is_err());

        p.initialize(&ConfigMap::new()).await.unwrap();
        let snapshot = p.get_ui_snapshot(&ConfigMap::new()).await.unwrap();
        assert_eq!(snapshot.window_title, "Mock Window");
        assert_eq!(snapshot.elements.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_find_and_read() {
        let p = MockPerception::default();
        p.initialize(&ConfigMap::new()).await.unwrap();

        let ok = p.find_element(&ElementQuery::new("name", "OK")).await.unwrap().unwrap();
        assert_eq!(ok.id, ElementId::new("mock-button"));
        assert!(p.find_element(&ElementQuery::new("name", "Nope")).await.unwrap().is_none());

        let all = p
            .find_elements(&ElementQuery {
                max_results: 0,
                ..ElementQuery::new("name", "")
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let text = p.get_element_text(&ElementId::new("mock-label")).await.unwrap();
        assert_eq!(text.as_deref(), Some("Ready"));
        let focused = p.get_focused_element().await.unwrap().unwrap();
        assert_eq!(focused.id, ElementId::new("mock-input"));
        assert!(p.get_element_state(&ElementId::new("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_action_echoes() {
        let a = MockAction::default();
        a.initialize(&ConfigMap::new()).await.unwrap();

        let result = a.click(&ElementId::new("mock-button"), &ConfigMap::new()).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("mock-button"));

        let mut params = ConfigMap::new();
        params.insert("nested".into(), json!({"list": [1, "two", null]}));
        let result = a.execute_native_command("refresh", &params).await.unwrap();
        assert_eq!(result.data, params);

        a.close().await.unwrap();
        assert!(a.press_key("ctrl+s", &ConfigMap::new()).await.is_err());
    }
}
