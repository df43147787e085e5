//! Agent Card：对外公布的 Agent 描述与技能列表（供发现使用）

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::core::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// 一个技能对应注册表中的一个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    pub url: String,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    /// 从 Agent 生成 card；Agent 没有描述时失败
    pub fn for_agent(agent: &Agent, version: &str, url: impl Into<String>) -> Result<Self, AgentError> {
        let description = agent
            .description()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "agent '{}' needs a description to be served",
                    agent.name()
                ))
            })?;

        let skills = agent
            .skills()
            .into_iter()
            .map(|tool| AgentSkill {
                id: format!("{}-{}", agent.name(), tool.name),
                name: tool.name,
                description: tool.description,
                tags: Vec::new(),
            })
            .collect();

        Ok(Self {
            name: agent.name().to_string(),
            description: description.to_string(),
            version: version.to_string(),
            url: url.into(),
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            capabilities: AgentCapabilities::default(),
            skills,
        })
    }
}

/// `http://{host}:{port}/{endpoint}`，endpoint 的前导 `/` 会被去掉
pub fn card_url(host: &str, port: u16, endpoint: &str) -> String {
    format!("http://{host}:{port}/{}", endpoint.trim_start_matches('/'))
}
