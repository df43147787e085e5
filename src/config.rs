//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__SERVING__PORT=9000`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::ModelPrice;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub serving: ServingSection,
    pub tools: ToolsSection,
    pub pricing: PricingSection,
}

/// [agent] 段：名称、描述、系统指令、最大轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: String,
    /// 对外服务时必填（agent card 需要）
    pub description: Option<String>,
    /// 未设置时使用默认系统提示词
    pub instructions: Option<String>,
    pub max_turns: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "hive-agent".to_string(),
            description: None,
            instructions: None,
            max_turns: 10,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    /// 未设置时读 OPENAI_API_KEY
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

/// [serving] 段：监听地址、路由前缀、会话超时、关闭宽限期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServingSection {
    pub host: String,
    /// 0 表示由系统分配
    pub port: u16,
    pub endpoint: String,
    pub version: String,
    pub context_timeout_minutes: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ServingSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            endpoint: "/".to_string(),
            version: "0.1.0".to_string(),
            context_timeout_minutes: 10,
            shutdown_grace_secs: 10,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub remote: Vec<RemoteToolConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
    /// 事件流传输未实现，加载时拒绝
    Sse,
}

/// [[tools.remote]]：一个远程工具服务
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolConfig {
    pub name: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// [pricing] 段：model_id -> 单价
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PricingSection {
    pub models: HashMap<String, ModelPrice>,
}

impl AppConfig {
    /// 加载后的语义校验
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.max_turns == 0 {
            return Err(AgentError::Config("agent.max_turns must be at least 1".into()));
        }
        for remote in &self.tools.remote {
            match remote.transport {
                TransportKind::Sse => {
                    return Err(AgentError::Config(format!(
                        "tools.remote '{}': sse transport is not supported",
                        remote.name
                    )))
                }
                TransportKind::Http if remote.url.is_none() => {
                    return Err(AgentError::Config(format!(
                        "tools.remote '{}': http transport requires url",
                        remote.name
                    )))
                }
                TransportKind::Stdio if remote.command.is_none() => {
                    return Err(AgentError::Config(format!(
                        "tools.remote '{}': stdio transport requires command",
                        remote.name
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// 加载配置：config/default.toml（可选）→ 指定文件 → 环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| AgentError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
