//! Echo 工具（测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ParamSpec, ParamType, Tool};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back unchanged (for testing)."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("text", ParamType::String).with_description("Text to echo")]
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        args.get("text")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| "missing required argument 'text'".to_string())
    }
}
