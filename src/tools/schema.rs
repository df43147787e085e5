//! 工具参数描述与 JSON Schema 生成
//!
//! 工具的参数在注册时以静态描述给出（名称、类型、是否必填），
//! 再据此生成发给模型的 function schema。

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 参数类型（JSON Schema 基本类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// 解析 JSON Schema 的 "type" 字段；无法识别时返回 None
    pub fn from_json_type(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// 单个参数的声明；param_type 为 None 表示类型缺失，注册时会被拒绝
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: Option<ParamType>,
    pub required: bool,
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type: Some(param_type),
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 发给模型的工具 schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 由参数声明生成 object 类型的 JSON Schema
pub fn parameters_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in params {
        let mut prop = Map::new();
        if let Some(ty) = p.param_type {
            prop.insert("type".into(), Value::String(ty.as_str().into()));
        }
        let description = p
            .description
            .clone()
            .unwrap_or_else(|| format!("Parameter {}", p.name));
        prop.insert("description".into(), Value::String(description));
        properties.insert(p.name.clone(), Value::Object(prop));
        if p.required {
            required.push(Value::String(p.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
