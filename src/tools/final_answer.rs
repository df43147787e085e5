//! 终止工具：模型调用它即结束本次运行，参数 answer 即最终输出

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ParamSpec, ParamType, Tool};

pub const FINAL_ANSWER_TOOL: &str = "final_answer";

pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        FINAL_ANSWER_TOOL
    }

    fn description(&self) -> &str {
        "Return the final answer to the user and end the task."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("answer", ParamType::String)
            .with_description("The complete final answer")]
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        Ok(answer_from_args(&args))
    }
}

/// 取 answer 参数；非字符串时保留其 JSON 文本，缺失时使用整个参数对象
pub fn answer_from_args(args: &Value) -> String {
    match args.get("answer") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => args.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_from_args() {
        assert_eq!(answer_from_args(&json!({"answer": "42"})), "42");
        assert_eq!(
            answer_from_args(&json!({"answer": {"result": "ok"}})),
            r#"{"result":"ok"}"#
        );
    }
}
