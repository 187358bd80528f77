//! RPC 客户端（reqwest）
//!
//! 每个方法对应一个服务端路由；非 2xx 应答解析为 `ClientError::Rpc`。

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::messages::*;
use crate::plugins::{ActionResult, ConfigMap, DropTarget, ElementId, ElementQuery, ScrollDirection, UiElement, UiSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error ({status}): {message}")]
    Rpc { status: u16, message: String },
}

/// Argus RPC 客户端
#[derive(Debug, Clone)]
pub struct ArgusClient {
    base_url: String,
    http: Client,
}

impl ArgusClient {
    /// `base_url` 形如 `http://127.0.0.1:50051`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn get<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, ClientError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    async fn decode<Resp: DeserializeOwned>(response: reqwest::Response) -> Result<Resp, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(ClientError::Rpc {
            status: status.as_u16(),
            message,
        })
    }

    // ---------- AdapterControl ----------

    pub async fn initialize_adapter(&self, adapter_name: &str, config: ConfigMap) -> Result<ControlResponse, ClientError> {
        let req = InitializeRequest {
            adapter_name: adapter_name.to_string(),
            config,
        };
        self.post("adapter-control/initialize", &req).await
    }

    /// 请求服务端关闭；应答在关闭完成前返回
    pub async fn shutdown(&self) -> Result<ControlResponse, ClientError> {
        self.post("adapter-control/shutdown", &serde_json::json!({})).await
    }

    // ---------- Perception ----------

    pub async fn get_ui_snapshot(&self, target_app: Option<&str>, options: ConfigMap) -> Result<UiSnapshot, ClientError> {
        let req = SnapshotRequest {
            target_app: target_app.map(str::to_string),
            options,
        };
        self.post("perception/get-ui-snapshot", &req).await
    }

    pub async fn find_element(&self, target_app: Option<&str>, query: ElementQuery) -> Result<Option<UiElement>, ClientError> {
        let req = FindElementRequest {
            target_app: target_app.map(str::to_string),
            query,
        };
        let resp: ElementResponse = self.post("perception/find-element", &req).await?;
        Ok(resp.element)
    }

    pub async fn find_elements(&self, target_app: Option<&str>, query: ElementQuery) -> Result<Vec<UiElement>, ClientError> {
        let req = FindElementRequest {
            target_app: target_app.map(str::to_string),
            query,
        };
        let resp: ElementsResponse = self.post("perception/find-elements", &req).await?;
        Ok(resp.elements)
    }

    pub async fn get_element_state(&self, target_app: Option<&str>, element_id: &ElementId) -> Result<ConfigMap, ClientError> {
        let req = ElementRequest {
            target_app: target_app.map(str::to_string),
            element_id: element_id.clone(),
        };
        let resp: ElementStateResponse = self.post("perception/get-element-state", &req).await?;
        Ok(resp.state)
    }

    pub async fn get_element_text(&self, target_app: Option<&str>, element_id: &ElementId) -> Result<Option<String>, ClientError> {
        let req = ElementRequest {
            target_app: target_app.map(str::to_string),
            element_id: element_id.clone(),
        };
        let resp: ElementTextResponse = self.post("perception/get-element-text", &req).await?;
        Ok(resp.text)
    }

    pub async fn get_focused_element(&self, target_app: Option<&str>) -> Result<Option<UiElement>, ClientError> {
        let req = TargetRequest {
            target_app: target_app.map(str::to_string),
        };
        let resp: ElementResponse = self.post("perception/get-focused-element", &req).await?;
        Ok(resp.element)
    }

    // ---------- Action ----------

    pub async fn click(&self, target_app: Option<&str>, element_id: &ElementId, options: ConfigMap) -> Result<ActionResult, ClientError> {
        let req = ClickRequest {
            target_app: target_app.map(str::to_string),
            element_id: element_id.clone(),
            options,
        };
        self.post("action/click", &req).await
    }

    pub async fn type_text(
        &self,
        target_app: Option<&str>,
        text: &str,
        element_id: Option<&ElementId>,
        options: ConfigMap,
    ) -> Result<ActionResult, ClientError> {
        let req = TypeTextRequest {
            target_app: target_app.map(str::to_string),
            text: text.to_string(),
            element_id: element_id.cloned(),
            options,
        };
        self.post("action/type-text", &req).await
    }

    pub async fn scroll(
        &self,
        target_app: Option<&str>,
        direction: ScrollDirection,
        magnitude: i32,
        element_id: Option<&ElementId>,
        options: ConfigMap,
    ) -> Result<ActionResult, ClientError> {
        let req = ScrollRequest {
            target_app: target_app.map(str::to_string),
            direction,
            magnitude,
            element_id: element_id.cloned(),
            options,
        };
        self.post("action/scroll", &req).await
    }

    pub async fn press_key(&self, target_app: Option<&str>, key_combination: &str, options: ConfigMap) -> Result<ActionResult, ClientError> {
        let req = PressKeyRequest {
            target_app: target_app.map(str::to_string),
            key_combination: key_combination.to_string(),
            options,
        };
        self.post("action/press-key", &req).await
    }

    pub async fn drag_and_drop(
        &self,
        target_app: Option<&str>,
        source: &ElementId,
        target: DropTarget,
        options: ConfigMap,
    ) -> Result<ActionResult, ClientError> {
        let req = DragAndDropRequest {
            target_app: target_app.map(str::to_string),
            source_element_id: source.clone(),
            target,
            options,
        };
        self.post("action/drag-and-drop", &req).await
    }

    pub async fn execute_native_command(
        &self,
        target_app: Option<&str>,
        command_name: &str,
        params: ConfigMap,
    ) -> Result<ActionResult, ClientError> {
        let req = NativeCommandRequest {
            target_app: target_app.map(str::to_string),
            command_name: command_name.to_string(),
            params,
        };
        self.post("action/execute-native-command", &req).await
    }

    // ---------- Engine ----------

    pub async fn engine_status(&self) -> Result<EngineStatusResponse, ClientError> {
        self.get("engine/status").await
    }

    pub async fn start_engine(&self) -> Result<ControlResponse, ClientError> {
        self.post("engine/start", &serde_json::json!({})).await
    }

    pub async fn stop_engine(&self) -> Result<ControlResponse, ClientError> {
        self.post("engine/stop", &serde_json::json!({})).await
    }

    pub async fn run_task(&self, description: &str, target_app: &str) -> Result<RunTaskResponse, ClientError> {
        let req = RunTaskRequest {
            description: description.to_string(),
            target_app: target_app.to_string(),
        };
        self.post("engine/run-task", &req).await
    }

    pub async fn list_adapters(&self) -> Result<AdaptersResponse, ClientError> {
        self.get("adapters").await
    }
}
