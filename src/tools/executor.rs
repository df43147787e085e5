//! 工具执行器
//!
//! 持有本次运行的 ToolRegistry，execute(tool_name, args) 调用 registry.invoke，
//! 失败时转为 "Error executing tool: ..." 文本（作为数据回传给模型）；每次调用输出结构化审计日志（JSON）。
//! 不对单次调用施加超时，运行只受 max_turns 约束。

use std::time::Instant;

use serde_json::Value;

use crate::tools::{ToolRegistry, ToolSchema};

/// 一次工具调用的结果：output 总是可回传给模型的文本，error 标记调用是否失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 工具执行器：把调用结果统一映射为 ToolOutcome
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 执行指定工具；未知工具与执行失败都转为错误文本；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolOutcome {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = self.registry.invoke(tool_name, args).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => ToolOutcome {
                output,
                error: None,
            },
            Err(e) => ToolOutcome {
                output: format!("Error executing tool: {e}"),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn tool_description(&self, name: &str) -> Option<&str> {
        self.registry.descriptor(name).map(|d| d.description.as_str())
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
