//! OpenRouter LLM Client
//!
//! Chat-completions client for OpenRouter (or any OpenAI-compatible
//! endpoint), with function/tool calling. Implements the [`LlmClient`] port:
//! one request/response round trip per call, every transport or protocol
//! failure mapped to [`LlmUnavailable`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{
    CompletionOutcome, LlmClient, LlmMessage, LlmRole, LlmUnavailable, ToolCallRequest, ToolSpec,
};

/// Default OpenRouter endpoint.
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

// =============================================================================
// Configuration
// =============================================================================

/// OpenRouter client configuration.
#[derive(Clone)]
pub struct OpenRouterConfig {
    /// API base URL (no trailing slash).
    pub base_url: String,
    /// Bearer credential.
    pub api_key: String,
    /// Model identifier, e.g. `anthropic/claude-sonnet-4`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Request timeout; this call is the turn's dominant suspension point.
    pub timeout: std::time::Duration,
}

impl OpenRouterConfig {
    /// Config with defaults for everything but the credential and model.
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
            temperature: 0.7,
            max_tokens: 2_000,
            timeout: std::time::Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the OpenAI wire format.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

fn wire_role(role: LlmRole) -> &'static str {
    match role {
        LlmRole::System => "system",
        LlmRole::User => "user",
        LlmRole::Assistant => "assistant",
        LlmRole::Tool => "tool",
    }
}

fn to_wire_message(message: &LlmMessage) -> WireMessage<'_> {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
        )
    };

    WireMessage {
        role: wire_role(message.role),
        // Assistant tool-call messages carry no text content.
        content: (!message.content.is_empty()).then_some(message.content.as_str()),
        tool_calls,
        tool_call_id: message.tool_call_id.as_deref(),
    }
}

fn parse_tool_call(wire: WireToolCall) -> ToolCallRequest {
    // Arguments arrive as a JSON-encoded string; a string the model got
    // wrong is preserved verbatim so schema validation can reject it with a
    // useful message instead of this layer guessing.
    let arguments = serde_json::from_str::<Value>(&wire.function.arguments)
        .unwrap_or(Value::String(wire.function.arguments));

    ToolCallRequest {
        id: wire.id,
        name: wire.function.name,
        arguments,
    }
}

// =============================================================================
// Client
// =============================================================================

/// OpenRouter chat-completions client.
pub struct OpenRouterClient {
    config: OpenRouterConfig,
    http: reqwest::Client,
}

impl OpenRouterClient {
    /// Create the client.
    ///
    /// # Errors
    ///
    /// Returns [`LlmUnavailable`] if the HTTP client cannot be constructed.
    pub fn new(config: OpenRouterConfig) -> Result<Self, LlmUnavailable> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmUnavailable(e.to_string()))?;

        Ok(Self { config, http })
    }

    /// The configured model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSpec],
    ) -> Result<CompletionOutcome, LlmUnavailable> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages: messages.iter().map(to_wire_message).collect(),
            tools: tools
                .iter()
                .map(|spec| WireTool {
                    kind: "function",
                    function: spec,
                })
                .collect(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "LLM endpoint error");
            return Err(LlmUnavailable(format!("HTTP {status}: {body}")));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmUnavailable(format!("malformed completion: {e}")))?;

        let Some(choice) = body.choices.into_iter().next() else {
            return Err(LlmUnavailable("completion had no choices".to_string()));
        };

        if !choice.message.tool_calls.is_empty() {
            let calls = choice
                .message
                .tool_calls
                .into_iter()
                .map(parse_tool_call)
                .collect();
            return Ok(CompletionOutcome::ToolCalls(calls));
        }

        match choice.message.content {
            Some(text) if !text.is_empty() => Ok(CompletionOutcome::Text(text)),
            _ => Err(LlmUnavailable("completion had no content".to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> OpenRouterClient {
        let mut config = OpenRouterConfig::new("test-key".to_string(), "test/model".to_string());
        config.base_url = server.uri();
        OpenRouterClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn text_completion_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "test/model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "AAPL trades at 190.12." } }]
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .complete(&[LlmMessage::user("price of AAPL?")], &[])
            .await
            .unwrap();

        match outcome {
            CompletionOutcome::Text(text) => assert!(text.contains("190.12")),
            CompletionOutcome::ToolCalls(_) => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn tool_call_completion_parses_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "price_lookup",
                            "arguments": "{\"symbol\":\"AAPL\"}"
                        }
                    }]
                } }]
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .complete(&[LlmMessage::user("price of AAPL?")], &[])
            .await
            .unwrap();

        let CompletionOutcome::ToolCalls(calls) = outcome else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "price_lookup");
        assert_eq!(calls[0].arguments, json!({ "symbol": "AAPL" }));
    }

    #[tokio::test]
    async fn malformed_arguments_preserved_as_string() {
        let wire = WireToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: "price_lookup".to_string(),
                arguments: "not json".to_string(),
            },
        };
        let call = parse_tool_call(wire);
        assert_eq!(call.arguments, Value::String("not json".to_string()));
    }

    #[tokio::test]
    async fn http_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&[LlmMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.0.contains("503"));
    }

    #[tokio::test]
    async fn empty_choices_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&[LlmMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.0.contains("no choices"));
    }

    #[test]
    fn assistant_tool_call_message_serializes_without_content() {
        let message = LlmMessage::assistant_tool_calls(vec![ToolCallRequest {
            id: "call_1".to_string(),
            name: "price_lookup".to_string(),
            arguments: json!({ "symbol": "AAPL" }),
        }]);

        let wire = to_wire_message(&message);
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], Value::Null);
        assert_eq!(value["tool_calls"][0]["function"]["name"], "price_lookup");
        // Arguments are a JSON-encoded string on the wire.
        assert!(value["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let message = LlmMessage::tool_result("call_1", &json!({ "price": "190.12" }));
        let wire = to_wire_message(&message);
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = OpenRouterConfig::new("sk-secret".to_string(), "m".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
