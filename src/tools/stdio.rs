//! 本地管道传输：启动子进程，以换行分隔的 JSON-RPC 在 stdin/stdout 上通信
//!
//! 连接时完成 initialize 握手。同一时刻只有一个请求在途：写请求与读响应在同一把锁内完成，
//! 保证响应与请求一一对应。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::tools::remote::{
    CallToolResult, ListToolsResult, RemoteToolDescriptor, ToolTransport, TransportError,
};

const PROTOCOL_VERSION: &str = "2024-11-05";

struct Pipe {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct StdioToolTransport {
    name: String,
    process: Mutex<Child>,
    pipe: Mutex<Pipe>,
    next_id: AtomicI64,
}

impl StdioToolTransport {
    /// 启动子进程并完成握手
    pub async fn connect(
        name: impl Into<String>,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut process = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdin"))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;

        let transport = Self {
            name: name.into(),
            process: Mutex::new(process),
            pipe: Mutex::new(Pipe {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicI64::new(1),
        };
        transport.initialize().await?;
        Ok(transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized").await?;
        tracing::info!(server = %self.name, "Tool server initialized");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        let mut process = self.process.lock().await;
        matches!(process.try_wait(), Ok(None))
    }

    pub async fn shutdown(&self) {
        let mut process = self.process.lock().await;
        if let Err(e) = process.kill().await {
            tracing::warn!(server = %self.name, error = %e, "Failed to kill tool server");
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        // 持锁后再分配 ID，管道上的 ID 因此单调递增
        let mut pipe = self.pipe.lock().await;
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = RequestId::Number(seq);
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let line = serde_json::to_string(&request)?;
        write_line(&mut pipe.stdin, &line).await?;

        loop {
            let mut buf = String::new();
            if pipe.stdout.read_line(&mut buf).await? == 0 {
                return Err(TransportError::ServerExited);
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_str(trimmed)?;
            match &response.id {
                // 服务端通知，忽略
                None => continue,
                Some(got) if *got == id => return Ok(response.into_result()?),
                // 被放弃的旧请求的迟到响应
                Some(RequestId::Number(old)) if *old < seq => {
                    tracing::debug!(server = %self.name, stale = old, expected = seq, "Skipping stale response");
                    continue;
                }
                Some(got) => {
                    return Err(TransportError::InvalidResponse(format!(
                        "response ID mismatch: expected {id:?}, got {got:?}"
                    )))
                }
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method))?;
        let mut pipe = self.pipe.lock().await;
        write_line(&mut pipe.stdin, &line).await
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), TransportError> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait]
impl ToolTransport for StdioToolTransport {
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

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// 用 sh 脚本模拟工具服务：按行读请求，按固定顺序回响应
    const FAKE_SERVER: &str = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'
read initialized
read list
echo '{"jsonrpc":"2.0","method":"notifications/progress"}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}'
read call
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
"#;

    #[tokio::test]
    async fn test_stdio_handshake_list_and_call() {
        let transport = StdioToolTransport::connect(
            "fake",
            "sh",
            &["-c".to_string(), FAKE_SERVER.to_string()],
            &HashMap::new(),
        )
        .await
        .unwrap();

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let out = transport
            .call("echo", json!({"text": "ping"}))
            .await
            .unwrap();
        assert_eq!(out, "pong");

        let err = transport.call("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::ServerExited | TransportError::Io(_)));
    }

    /// tools/list 之前先回一条旧 ID 的响应，之后回一条 ID 超前的响应
    const STALE_SERVER: &str = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'
read initialized
read list
echo '{"jsonrpc":"2.0","id":1,"result":{"late":true}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
read call
echo '{"jsonrpc":"2.0","id":9,"result":{"content":[]}}'
"#;

    #[tokio::test]
    async fn test_stale_responses_skipped_future_ids_rejected() {
        let transport = StdioToolTransport::connect(
            "stale",
            "sh",
            &["-c".to_string(), STALE_SERVER.to_string()],
            &HashMap::new(),
        )
        .await
        .unwrap();

        assert!(transport.list_tools().await.unwrap().is_empty());

        let err = transport.call("echo", json!({"text": "x"})).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }
}
