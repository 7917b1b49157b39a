use std::time::Duration;

use async_trait::async_trait;
use cartograph_core::{CartographError, LlmConfig};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use cartograph_agent::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Who calls handleLogin?");
/// assert!(matches!(msg.role, Role::User));
/// assert!(msg.tool_calls.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Tool invocations requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on [`Role::Tool`] messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Result of executing the tool call `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use cartograph_agent::llm::Role;
///
/// assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Output of a tool call.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

fn function_kind() -> String {
    "function".into()
}

/// Tool name plus its JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON object, as a string.
    #[serde(default)]
    pub arguments: String,
}

/// Declaration of a callable tool.
///
/// Serializes to the OpenAI `{"type": "function", "function": {...}}` shape.
///
/// # Examples
///
/// ```
/// use cartograph_agent::llm::ToolSpec;
///
/// let spec = ToolSpec::new("overview", "Summarize the graph", serde_json::json!({"type": "object", "properties": {}}));
/// let json = serde_json::to_value(&spec).unwrap();
/// assert_eq!(json["type"], "function");
/// assert_eq!(json["function"]["name"], "overview");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl Serialize for ToolSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
        .serialize(serializer)
    }
}

/// A chat model that can request tool calls.
///
/// Implemented by [`LlmClient`]; tests substitute scripted models.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send the conversation and tool manifest, returning the assistant turn.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Llm`] on transport or response failures.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        max_tokens: u32,
    ) -> Result<ChatMessage, CartographError>;
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint
/// with function calling: OpenAI, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cartograph_core::LlmConfig;
/// use cartograph_agent::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config, Duration::from_secs(30)).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig, timeout: Duration) -> Result<Self, CartographError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CartographError::Llm(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');
        format!("{base_url}/v1/chat/completions")
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        max_tokens: u32,
    ) -> Result<ChatMessage, CartographError> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.1,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
            body["tool_choice"] = serde_json::Value::from("auto");
        }

        let mut request = self.client.post(self.endpoint());
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        request = request.header("Content-Type", "application/json");

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| CartographError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CartographError::Llm(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CartographError::Llm(format!("failed to parse response: {e}")))?;

        parse_completion(&response_body)
    }
}

/// Extract the assistant message from a chat completion response body.
///
/// # Errors
///
/// Returns [`CartographError::Llm`] if the body has no `choices[0].message`.
pub fn parse_completion(body: &serde_json::Value) -> Result<ChatMessage, CartographError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| CartographError::Llm(format!("unexpected response structure: {body}")))?;
    serde_json::from_value(message.clone())
        .map_err(|e| CartographError::Llm(format!("malformed assistant message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_succeeds() {
        let client = LlmClient::new(&LlmConfig::default(), Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn endpoint_respects_base_url() {
        let config = LlmConfig {
            base_url: Some("http://localhost:11434/".into()),
            ..LlmConfig::default()
        };
        let client = LlmClient::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn tool_result_serializes_call_id() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn parses_tool_call_completion() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"query\":\"login\"}"}
                    }]
                }
            }]
        });
        let msg = parse_completion(&body).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls[0].function.name, "search");
        assert_eq!(msg.tool_calls[0].id, "call_9");
    }

    #[test]
    fn parses_plain_completion() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "done"}}]
        });
        let msg = parse_completion(&body).unwrap();
        assert_eq!(msg.content, "done");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn rejects_missing_choices() {
        let err = parse_completion(&serde_json::json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, CartographError::Llm(_)));
    }
}
