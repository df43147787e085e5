//! Agent 运行时
//!
//! Agent 持有模型客户端、声明的工具与运行配置。构造时校验一次工具声明；
//! 每次 run 都新建独占的 ToolRegistry 与 Trace，互不共享。
//! create_agent 从 AppConfig 构建：OpenAI 兼容客户端、远程工具发现、价格表。
//! 每次运行的回调链为默认回调（成本、span 日志）加上 with_callback 注册的回调。

use std::sync::Arc;

use crate::config::{AppConfig, RemoteToolConfig, TransportKind};
use crate::core::{AgentError, RegistryError, RunError};
use crate::llm::{LlmClient, OpenAiClient, PriceTable, PricingLookup};
use crate::react::{default_callbacks, react_loop, Callback, OutputSchema, ReactSession, RunOutput};
use crate::tools::{
    discover_tools, FinalAnswerTool, HttpToolTransport, StdioToolTransport, Tool, ToolDescriptor,
    ToolExecutor, ToolRegistry, ToolTransport, FINAL_ANSWER_TOOL,
};
use crate::trace::Trace;

/// 单次运行的配置
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub name: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub max_turns: usize,
    pub output_schema: Option<OutputSchema>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "hive-agent".to_string(),
            description: None,
            instructions: None,
            max_turns: 10,
            output_schema: None,
        }
    }
}

pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: Vec<Arc<dyn Tool>>,
    config: RunConfig,
    pricing: Option<Arc<dyn PricingLookup>>,
    callbacks: Vec<Arc<dyn Callback>>,
}

impl Agent {
    /// 校验工具声明；未声明终止工具时自动追加 final_answer
    pub fn new(
        llm: Arc<dyn LlmClient>,
        mut tools: Vec<Arc<dyn Tool>>,
        config: RunConfig,
    ) -> Result<Self, RegistryError> {
        if !tools.iter().any(|t| t.name() == FINAL_ANSWER_TOOL) {
            tools.push(Arc::new(FinalAnswerTool));
        }
        let agent = Self {
            llm,
            tools,
            config,
            pricing: None,
            callbacks: Vec::new(),
        };
        agent.build_registry()?;
        Ok(agent)
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingLookup>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// 追加在默认回调之后
    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.config.output_schema = Some(schema);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    /// 对外公布的工具（不含终止工具）
    pub fn skills(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| t.name() != FINAL_ANSWER_TOOL)
            .filter_map(|t| ToolDescriptor::from_tool(t.as_ref()).ok())
            .collect()
    }

    fn build_registry(&self) -> Result<ToolRegistry, RegistryError> {
        let mut registry = ToolRegistry::new();
        for tool in &self.tools {
            registry.register_arc(Arc::clone(tool))?;
        }
        Ok(registry)
    }

    /// 执行一次运行
    pub async fn run(&self, prompt: &str) -> Result<RunOutput, RunError> {
        let registry = self
            .build_registry()
            .map_err(|e| RunError::new(e.into(), Trace::new()))?;
        let executor = ToolExecutor::new(registry);
        let mut callbacks = default_callbacks(self.pricing.clone());
        callbacks.extend(self.callbacks.iter().cloned());

        let mut session = ReactSession::new(self.llm.as_ref(), &executor, &self.config.name)
            .with_max_turns(self.config.max_turns)
            .with_callbacks(&callbacks);
        if let Some(instructions) = self.config.instructions.as_deref() {
            session = session.with_instructions(instructions);
        }
        if let Some(description) = self.config.description.as_deref() {
            session = session.with_description(description);
        }
        if let Some(schema) = self.config.output_schema.as_ref() {
            session = session.with_output_schema(schema);
        }

        tracing::debug!(agent = %self.config.name, tools = ?executor.tool_names(), "Agent run started");
        react_loop(&session, prompt).await
    }
}

/// 从配置构建 Agent：模型客户端、远程工具、价格表
pub async fn create_agent(cfg: &AppConfig) -> Result<Agent, AgentError> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        cfg.llm.api_key.as_deref(),
    ));

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for remote in &cfg.tools.remote {
        let transport = connect_transport(remote).await?;
        for tool in discover_tools(transport).await? {
            tools.push(Arc::new(tool));
        }
    }

    let config = RunConfig {
        name: cfg.agent.name.clone(),
        description: cfg.agent.description.clone(),
        instructions: cfg.agent.instructions.clone(),
        max_turns: cfg.agent.max_turns,
        output_schema: None,
    };
    let pricing = Arc::new(PriceTable::new(cfg.pricing.models.clone()));
    Ok(Agent::new(llm, tools, config)?.with_pricing(pricing))
}

async fn connect_transport(remote: &RemoteToolConfig) -> Result<Arc<dyn ToolTransport>, AgentError> {
    let missing = |field: &str| {
        AgentError::Config(format!("tools.remote '{}': missing {field}", remote.name))
    };
    match remote.transport {
        TransportKind::Http => {
            let url = remote.url.as_deref().ok_or_else(|| missing("url"))?;
            tracing::info!(server = %remote.name, url = %url, "Using HTTP tool server");
            Ok(Arc::new(HttpToolTransport::new(url)))
        }
        TransportKind::Stdio => {
            let command = remote.command.as_deref().ok_or_else(|| missing("command"))?;
            let transport =
                StdioToolTransport::connect(&remote.name, command, &remote.args, &remote.env)
                    .await
                    .map_err(|e| RegistryError::Discovery(e.to_string()))?;
            Ok(Arc::new(transport))
        }
        TransportKind::Sse => Err(AgentError::Config(format!(
            "tools.remote '{}': sse transport is not supported",
            remote.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelReply, ScriptedLlmClient};
    use crate::tools::EchoTool;

    #[test]
    fn test_new_rejects_duplicate_tools() {
        let llm = Arc::new(ScriptedLlmClient::new("mock"));
        let err = Agent::new(
            llm,
            vec![Arc::new(EchoTool), Arc::new(EchoTool)],
            RunConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err, RegistryError::DuplicateTool("echo".into()));
    }

    #[test]
    fn test_skills_exclude_sentinel() {
        let llm = Arc::new(ScriptedLlmClient::new("mock"));
        let agent = Agent::new(llm, vec![Arc::new(EchoTool)], RunConfig::default()).unwrap();
        let names: Vec<String> = agent.skills().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo"]);
    }

    struct StopAfterFirstCall;

    #[async_trait::async_trait]
    impl Callback for StopAfterFirstCall {
        fn name(&self) -> &str {
            "stop_after_first_call"
        }

        async fn before_llm_call(
            &self,
            ctx: &mut crate::react::CallbackContext<'_>,
        ) -> Result<(), AgentError> {
            if ctx.trace.spans().iter().any(|s| s.is_model_call()) {
                return Err(AgentError::Callback {
                    name: self.name().to_string(),
                    reason: "one model call per run".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_and_registered_callbacks_run() {
        let llm = Arc::new(ScriptedLlmClient::repeating(
            "mock",
            ModelReply::tool_calls(vec![crate::memory::ToolCallRequest::new(
                "c1",
                "echo",
                serde_json::json!({"text": "x"}),
            )])
            .with_usage(10, 2),
        ));
        let agent = Agent::new(llm.clone(), vec![Arc::new(EchoTool)], RunConfig::default())
            .unwrap()
            .with_callback(Arc::new(StopAfterFirstCall));

        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err.source, AgentError::Callback { .. }));
        assert_eq!(llm.call_count(), 1);
        // 默认成本回调：无价格表时成本记为 0
        let first = &err.trace.spans()[0];
        assert_eq!(first.attribute_f64(crate::trace::attrs::USAGE_INPUT_COST), Some(0.0));
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let llm = Arc::new(
            ScriptedLlmClient::new("mock")
                .with_reply(ModelReply::text("first"))
                .with_reply(ModelReply::text("second")),
        );
        let agent = Agent::new(llm.clone(), vec![Arc::new(EchoTool)], RunConfig::default()).unwrap();

        let a = agent.run("one").await.unwrap();
        let b = agent.run("two").await.unwrap();
        assert_eq!(a.trace.spans().len(), 2);
        assert_eq!(b.trace.spans().len(), 2);
        assert_eq!(llm.requests()[1].tool_names, vec!["echo", FINAL_ANSWER_TOOL]);
    }
}
