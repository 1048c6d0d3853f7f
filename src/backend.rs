//! Inference backends: the language model behind an [`Agent`](crate::agent::Agent).
//!
//! Agents speak one protocol, a chat transcript plus the specs of the tools
//! they hold. `OpenAiCompatibleBackend` covers OpenAI, Groq, DeepSeek and
//! Ollama through the shared `/chat/completions` wire format.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// One model turn: either a final answer, tool calls to satisfy first, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Provider/model label for logs.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion>;
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: ChatRole,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
            msg.tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });
        WireMessage {
            role: msg.role,
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

/// Arguments arrive as a JSON-encoded string. Anything unparsable is passed
/// through as a string so the tool reports the argument error itself.
fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub struct OpenAiCompatibleBackend {
    label: String,
    config: BackendConfig,
    client: Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build inference HTTP client")?;
        let config = BackendConfig {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self {
            label: format!("openai-compatible:{}", config.model),
            config,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        let wire_tools = tools
            .iter()
            .map(|spec| WireTool {
                tool_type: "function",
                function: WireFunctionDef {
                    name: &spec.name,
                    description: &spec.description,
                    parameters: &spec.input_schema,
                },
            })
            .collect::<Vec<_>>();
        let request = WireRequest {
            model: &self.config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: (!wire_tools.is_empty()).then_some("auto"),
            tools: wire_tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut http = self.client.post(self.completions_url()).json(&request);
        if let Some(key) = self.config.api_key.as_deref() {
            http = http.bearer_auth(key);
        }

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Requesting chat completion"
        );
        let response = http
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.completions_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion request failed: {status} - {body}");
        }

        let parsed: WireResponse = response
            .json()
            .await
            .context("chat completion response was not valid JSON")?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .context("chat completion response contained no choices")?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                arguments: decode_arguments(&call.function.arguments),
                name: call.function.name,
            })
            .collect();

        Ok(Completion {
            content: message.content,
            tool_calls,
        })
    }
}

/// Offline backend: answers with the last user message. Useful for dry runs
/// and for exercising the pipeline without credentials.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Completion> {
        let last_user = messages
            .iter()
            .rev()
            .find(|msg| msg.role == ChatRole::User)
            .map(|msg| msg.content.clone())
            .unwrap_or_default();
        Ok(Completion::text(last_user))
    }
}
