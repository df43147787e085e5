//! 结构化输出：目标 JSON Schema（schemars 生成）与 jsonschema 校验
//!
//! 运行结束时若原始文本不符合 schema，只做一次格式修正调用，失败即硬错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::memory::Message;

const COERCION_SYSTEM_PROMPT: &str =
    "You are an expert that can convert raw text into structured JSON.";

/// 运行的目标输出 schema
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// 由 Rust 类型生成 schema
    pub fn of<T: JsonSchema>() -> Self {
        let root = schema_for!(T);
        let name = root
            .schema
            .metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| "output".to_string());
        Self {
            name,
            schema: serde_json::to_value(&root).unwrap_or(Value::Null),
        }
    }

    /// 校验一个值；Err 中为拼接后的错误描述
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        let validator = jsonschema::validator_for(&self.schema)
            .map_err(|e| format!("invalid output schema: {e}"))?;
        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// 解析并校验原始文本
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        let value: Value = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| format!("output is not valid JSON: {e}"))?;
        self.validate(&value)?;
        Ok(value)
    }

    /// 格式修正调用的消息
    pub fn coercion_messages(&self, raw: &str) -> Vec<Message> {
        vec![
            Message::system(COERCION_SYSTEM_PROMPT),
            Message::user(format!(
                "Please conform this output:\n{raw}\nTo match the following schema:\n{}.",
                self.schema
            )),
        ]
    }
}

/// 去掉 ```json ... ``` 包裹
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct CityAnswer {
        city: String,
        temperature: f64,
    }

    #[test]
    fn test_schema_of_type() {
        let schema = OutputSchema::of::<CityAnswer>();
        assert_eq!(schema.name, "CityAnswer");
        assert!(schema.schema["properties"]["city"].is_object());
    }

    #[test]
    fn test_parse_validates() {
        let schema = OutputSchema::of::<CityAnswer>();
        let ok = schema
            .parse("```json\n{\"city\": \"Oslo\", \"temperature\": 3.5}\n```")
            .unwrap();
        assert_eq!(ok, json!({"city": "Oslo", "temperature": 3.5}));

        assert!(schema.parse(r#"{"city": "Oslo"}"#).is_err());
        assert!(schema.parse("It is 3.5 degrees in Oslo").is_err());
    }

    #[test]
    fn test_coercion_messages() {
        let schema = OutputSchema::new("answer", json!({"type": "object"}));
        let msgs = schema.coercion_messages("raw text");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1]
            .content
            .starts_with("Please conform this output:\nraw text\nTo match the following schema:\n"));
    }
}
