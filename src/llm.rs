//! Completion providers: the boundary between the advance engine and whatever model
//! serves a turn.
//!
//! [`LlmProvider`] is deliberately thin and provider-agnostic — `model` is an opaque
//! routing string, never matched against a known-provider enum, so adding a new backend
//! never touches this trait. [`OpenAiCompatProvider`] is the one reference implementation,
//! good enough to run end-to-end against a local server (LM Studio, Ollama, vLLM) or a
//! hosted OpenAI-compatible endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::model::{Message, MessageRole, ModelConfig, ToolCallRecord};
use crate::retry::{retry_with_backoff_conditional, RetryConfig};
use crate::Result;

/// Anything capable of producing the next assistant message for a turn.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produce the assistant's next message given the system prompt, the full working
    /// message list so far, the routing string, and per-call config. Implementations
    /// should return `Error::llm_transient` for anything worth retrying (timeouts,
    /// connection failures, 5xx, rate limiting) and `Error::llm_permanent` for anything
    /// that will fail identically on retry (auth, malformed request, content policy).
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        config: &ModelConfig,
        timeout: Duration,
    ) -> Result<Message>;
}

/// Wrap a provider's `complete` call in the retry/backoff policy the advance engine
/// always applies: up to `max_retries` additional attempts, only for retryable errors,
/// each individual attempt bounded by `timeout`.
pub async fn complete_with_retry(
    provider: &dyn LlmProvider,
    system_prompt: &str,
    messages: &[Message],
    model: &str,
    config: &ModelConfig,
    timeout: Duration,
    max_retries: u32,
) -> Result<Message> {
    let retry_config = RetryConfig::new(max_retries + 1);
    retry_with_backoff_conditional(&retry_config, || {
        provider.complete(system_prompt, messages, model, config, timeout)
    })
    .await
    .inspect_err(|err| warn!(model, error = %err, "completion call did not succeed"))
}

/// Reference [`LlmProvider`] speaking the OpenAI-compatible chat-completions wire format.
/// Always requests `"stream": false` — streaming is out of scope for this crate, so there
/// is no SSE parsing path here at all.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    /// Construct directly from a base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Construct reading the key from `OPENAI_API_KEY`, falling back to `ANTHROPIC_API_KEY`
    /// for Anthropic-style OpenAI-compatible deployments.
    pub fn from_env(base_url: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .map_err(|_| {
                Error::validation(
                    "api_key",
                    "neither OPENAI_API_KEY nor ANTHROPIC_API_KEY is set",
                )
            })?;
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        config: &ModelConfig,
        timeout: Duration,
    ) -> Result<Message> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system_prompt.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        wire_messages.extend(messages.iter().map(to_wire_message));

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: wire_messages,
            stream: false,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop.clone(),
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(Error::llm_transient(format!("{status}: {body}")))
            } else {
                Err(Error::llm_permanent(format!("{status}: {body}")))
            };
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_permanent(format!("malformed response body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_permanent("provider returned no choices"))?;

        from_wire_message(choice.message, parsed.usage)
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::llm_transient(err.to_string())
    } else {
        Error::llm_permanent(err.to_string())
    }
}

fn to_wire_message(msg: &Message) -> WireMessage {
    WireMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.clone(),
        tool_calls: if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.call_id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        },
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn from_wire_message(wire: WireMessage, usage: Option<WireUsage>) -> Result<Message> {
    let role = MessageRole::parse(&wire.role)
        .ok_or_else(|| Error::llm_permanent(format!("unknown role in response: {}", wire.role)))?;
    if role != MessageRole::Assistant {
        return Err(Error::llm_permanent(format!(
            "expected an assistant message, provider returned role `{}`",
            wire.role
        )));
    }

    let tool_calls = wire
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCallRecord::new(c.id, c.function.name, c.function.arguments))
        .collect::<Vec<_>>();

    let mut message = if tool_calls.is_empty() {
        Message::assistant_text(wire.content.unwrap_or_default())
    } else {
        Message::assistant_tool_calls(wire.content, tool_calls)
    };
    if let Some(usage) = usage {
        message = message.with_usage(Some(usage.prompt_tokens), Some(usage.completion_tokens));
    }
    Ok(message)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChoice {
    message: WireMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct WireUsage {
    prompt_tokens: i32,
    completion_tokens: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wire_message_round_trips_tool_calls() {
        let msg = Message::assistant_tool_calls(
            Some("let me check".to_string()),
            vec![ToolCallRecord::new("call_1", "get_weather", r#"{"city":"nyc"}"#)],
        );
        let wire = to_wire_message(&msg);
        assert_eq!(wire.role, "assistant");
        let calls = wire.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"nyc"}"#);
    }

    #[test]
    fn test_from_wire_message_rejects_non_assistant_role() {
        let wire = WireMessage {
            role: "user".to_string(),
            content: Some("hi".to_string()),
            tool_calls: None,
            tool_call_id: None,
        };
        let err = from_wire_message(wire, None).unwrap_err();
        assert!(matches!(err, Error::Llm { transient: false, .. }));
    }

    #[test]
    fn test_from_wire_message_plain_text() {
        let wire = WireMessage {
            role: "assistant".to_string(),
            content: Some("hello there".to_string()),
            tool_calls: None,
            tool_call_id: None,
        };
        let msg = from_wire_message(wire, Some(WireUsage { prompt_tokens: 10, completion_tokens: 4 })).unwrap();
        assert_eq!(msg.content.as_deref(), Some("hello there"));
        assert_eq!(msg.input_tokens, Some(10));
        assert_eq!(msg.output_tokens, Some(4));
        assert!(msg.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_complete_with_retry_stops_on_permanent_error() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl LlmProvider for AlwaysFails {
            async fn complete(
                &self,
                _system_prompt: &str,
                _messages: &[Message],
                _model: &str,
                _config: &ModelConfig,
                _timeout: Duration,
            ) -> Result<Message> {
                Err(Error::llm_permanent("invalid api key"))
            }
        }

        let result = complete_with_retry(
            &AlwaysFails,
            "sys",
            &[],
            "gpt-4o-mini",
            &ModelConfig::default(),
            Duration::from_secs(5),
            3,
        )
        .await;
        assert!(result.is_err());
    }
}
