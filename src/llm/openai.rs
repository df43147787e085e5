//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；发送工具 schema 与可选 json_schema 输出格式，
//! 把回复映射为 ReplyContent。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{CompletionRequest, LlmClient, LlmError, ModelReply, ReplyContent, TokenUsage};
use crate::memory::{Message, Role, ToolCallRequest};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    /// api_key 为 None 时由 OpenAIConfig 读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut built = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(map_error)?;

        // 工具与输出格式按线上 JSON 形态构造，兼容 function / custom 两类工具定义
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            built.tools = Some(from_wire(Value::Array(tools))?);
        }
        if let Some(schema) = request.response_schema {
            built.response_format = Some(from_wire(json!({
                "type": "json_schema",
                "json_schema": {"name": schema.name, "schema": schema.schema}
            }))?);
        }
        Ok(built)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelReply, LlmError> {
        let body = self.build_request(&request)?;
        let response = self.client.chat().create(body).await.map_err(map_error)?;
        parse_response(response)
    }
}

fn map_error(e: OpenAIError) -> LlmError {
    match &e {
        OpenAIError::ApiError(api) => LlmError::Provider(api.message.clone()),
        OpenAIError::JSONDeserialize(..) => LlmError::MalformedReply(e.to_string()),
        _ => LlmError::Network(e.to_string()),
    }
}

fn from_wire<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::MalformedReply(e.to_string()))
}

fn to_request_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let message = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(map_error)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(map_error)?,
        ),
        // assistant 发起工具调用时 content 为空
        Role::Assistant if !m.tool_calls.is_empty() => {
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default()
                .build()
                .map_err(map_error)?;
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()}
                    })
                })
                .collect();
            assistant.tool_calls = Some(from_wire(Value::Array(calls))?);
            ChatCompletionRequestMessage::Assistant(assistant)
        }
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(map_error)?,
        ),
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(m.content.clone())
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(map_error)?,
        ),
    };
    Ok(message)
}

/// 回复中 function 类工具调用的线上形态
#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: String,
    function: FunctionCallBody,
}

#[derive(Debug, Deserialize)]
struct FunctionCallBody {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_response(response: CreateChatCompletionResponse) -> Result<ModelReply, LlmError> {
    let usage = response.usage.as_ref().map(|u| TokenUsage {
        input_tokens: u64::from(u.prompt_tokens),
        output_tokens: u64::from(u.completion_tokens),
    });

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::MalformedReply("no choices in response".to_string()))?;

    let tool_calls = message.tool_calls.unwrap_or_default();
    if !tool_calls.is_empty() {
        let calls = tool_calls
            .iter()
            .map(|call| {
                let wire = serde_json::to_value(call).map_err(|e| LlmError::MalformedReply(e.to_string()))?;
                let call: FunctionCall = from_wire(wire)?;
                let arguments = if call.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|e| {
                        LlmError::MalformedReply(format!(
                            "invalid arguments for tool {}: {e}",
                            call.function.name
                        ))
                    })?
                };
                Ok(ToolCallRequest::new(call.id, call.function.name, arguments))
            })
            .collect::<Result<Vec<_>, LlmError>>()?;
        return Ok(ModelReply {
            content: ReplyContent::ToolCalls(calls),
            usage,
        });
    }

    match message.content {
        Some(text) if !text.is_empty() => Ok(ModelReply {
            content: ReplyContent::PlainText(text),
            usage,
        }),
        _ => Err(LlmError::MalformedReply(
            "reply has neither content nor tool calls".to_string(),
        )),
    }
}
