//! Plain HTTP 传输：每次操作 POST 一个 JSON-RPC 请求，响应体即 JSON-RPC 响应

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::rpc::{JsonRpcRequest, JsonRpcResponse};
use crate::tools::remote::{
    CallToolResult, ListToolsResult, RemoteToolDescriptor, ToolTransport, TransportError,
};

pub struct HttpToolTransport {
    http: reqwest::Client,
    url: String,
    next_id: AtomicI64,
}

impl HttpToolTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicI64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "status {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(body.into_result()?)
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>, TransportError> {
        let value = self.request("tools/list", None).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    async fn call(&self, name: &str, args: Value) -> Result<String, TransportError> {
        let value = self
            .request("tools/call", Some(json!({"name": name, "arguments": args})))
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;
        result.into_text()
    }
}
