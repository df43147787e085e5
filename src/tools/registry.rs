//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），注册时校验并固化为
//! ToolDescriptor；ToolRegistry 按注册顺序保存，按名查找与调用。每次运行独占一个注册表。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{RegistryError, ToolError};
use crate::tools::schema::{parameters_schema, ParamSpec, ToolSchema};

/// 工具 trait：名称、描述（供 LLM 理解）、静态参数声明、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（同一次运行内唯一）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能，也作为 skill 描述公布）
    fn description(&self) -> &str;

    /// 参数声明；默认无参数
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// 执行工具；Err 中的文本会回传给模型
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 注册时固化的工具描述
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// 校验工具声明：描述非空、参数不重名且类型可解析
    pub fn from_tool(tool: &dyn Tool) -> Result<Self, RegistryError> {
        let name = tool.name().to_string();
        let description = tool.description().trim().to_string();
        if description.is_empty() {
            return Err(RegistryError::MissingDescription(name));
        }

        let parameters = tool.parameters();
        let mut seen = HashSet::new();
        for p in &parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(RegistryError::DuplicateParameter {
                    tool: name,
                    param: p.name.clone(),
                });
            }
            if p.param_type.is_none() {
                return Err(RegistryError::UnresolvableParameter {
                    tool: name,
                    param: p.name.clone(),
                });
            }
        }

        Ok(Self {
            name,
            description,
            parameters,
        })
    }

    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: parameters_schema(&self.parameters),
        }
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// 工具注册表：按注册顺序存储，支持 register / get / invoke / schemas
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.index.contains_key(tool.name()) {
            return Err(RegistryError::DuplicateTool(tool.name().to_string()));
        }
        let descriptor = ToolDescriptor::from_tool(tool.as_ref())?;
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { descriptor, tool });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i].tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按名调用；工具不存在返回 UnknownTool，执行失败返回 ExecutionFailed
    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args).await.map_err(ToolError::ExecutionFailed)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i].descriptor)
    }

    /// 发给模型的工具 schema 列表（注册顺序）
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.descriptors().map(ToolDescriptor::to_schema).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.descriptors().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::ParamType;
    use crate::tools::EchoTool;
    use serde_json::json;

    struct Undocumented;

    #[async_trait]
    impl Tool for Undocumented {
        fn name(&self) -> &str {
            "mystery"
        }
        fn description(&self) -> &str {
            "   "
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(String::new())
        }
    }

    struct BadParams {
        params: Vec<ParamSpec>,
    }

    #[async_trait]
    impl Tool for BadParams {
        fn name(&self) -> &str {
            "bad"
        }
        fn description(&self) -> &str {
            "has broken parameters"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            self.params.clone()
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".into())
        }
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("echo".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_missing_description() {
        let mut registry = ToolRegistry::new();
        let err = registry.register(Undocumented).unwrap_err();
        assert_eq!(err, RegistryError::MissingDescription("mystery".into()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_untyped_parameter() {
        let mut untyped = ParamSpec::required("when", ParamType::String);
        untyped.param_type = None;
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(BadParams {
                params: vec![untyped],
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnresolvableParameter { ref param, .. } if param == "when"));
    }

    #[test]
    fn test_register_rejects_duplicate_parameter() {
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(BadParams {
                params: vec![
                    ParamSpec::required("x", ParamType::Integer),
                    ParamSpec::optional("x", ParamType::String),
                ],
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateParameter { .. }));
    }

    #[tokio::test]
    async fn test_invoke_unknown_and_failing_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry
            .register(BadParams {
                params: vec![ParamSpec::required("x", ParamType::Integer)],
            })
            .unwrap();

        assert_eq!(
            registry.invoke("echo", json!({"text": "hi"})).await.unwrap(),
            "hi"
        );
        assert_eq!(
            registry.invoke("nope", json!({})).await.unwrap_err(),
            ToolError::UnknownTool("nope".into())
        );
        assert_eq!(
            registry.invoke("bad", json!({"x": 1})).await.unwrap_err(),
            ToolError::ExecutionFailed("boom".into())
        );
        assert_eq!(registry.tool_names(), vec!["echo", "bad"]);
    }
}
