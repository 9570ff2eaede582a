//! Core data model for the ImmAgent store.
//!
//! Every entity here is an **immutable value**: once constructed its fields never change.
//! Each carries a UUID `id` assigned at construction and a `created_at` timestamp. Entities
//! are connected into a graph purely by UUID reference (§3 of the spec) — there is no
//! in-memory pointer graph, which is what makes the [`crate::cache::IdentityCache`] a safe
//! accelerator rather than a second source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

/// A free-text payload referenced by UUID. Used for system prompts and any other
/// free-text value a caller wants to address content-addressably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAsset {
    /// Identity, assigned at construction.
    pub id: Uuid,
    /// Construction timestamp.
    pub created_at: DateTime<Utc>,
    /// Arbitrary UTF-8 content.
    pub content: String,
}

impl TextAsset {
    /// Construct a new text asset with a fresh id and the current timestamp.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            content: content.into(),
        }
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    /// The lowercase wire representation stored in the `role` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    /// Parse the wire representation back into a role. Unknown values are a data-integrity
    /// problem, not a recoverable validation error — they indicate the row was written by
    /// something other than this crate.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// One LLM-requested tool invocation, as carried on an assistant message.
///
/// `arguments` is preserved byte-for-byte as the raw JSON string the provider sent —
/// never round-tripped through [`serde_json::Value`] — to avoid re-serialization drift
/// (key order, numeric formatting) with whatever the provider's wire format happened to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Opaque identifier assigned by the provider, echoed back on the tool-result message.
    pub call_id: String,
    /// Name of the tool the model wants invoked.
    pub name: String,
    /// Raw JSON argument string, verbatim.
    pub arguments: String,
}

impl ToolCallRecord {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One turn in a conversation: a system/user/assistant/tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub role: MessageRole,
    /// May be `None`/empty when the message carries only tool calls.
    pub content: Option<String>,
    /// Ordered, possibly empty. Only meaningful on assistant messages.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Present only on messages with `role == Tool`, matching the originating call's id.
    pub tool_call_id: Option<String>,
    /// Usage counters, only ever populated on assistant messages returned by a provider
    /// that reports them.
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
}

impl Message {
    fn new(role: MessageRole, content: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Construct a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Some(content.into()))
    }

    /// Construct a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Some(content.into()))
    }

    /// Construct a plain-text assistant message (no tool calls).
    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Some(content.into()))
    }

    /// Construct an assistant message requesting tool calls. `content` may be empty.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Construct a tool-result message answering one call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Attach usage counters (builder-style, used by LLM providers assembling the
    /// returned assistant message).
    pub fn with_usage(mut self, input_tokens: Option<i32>, output_tokens: Option<i32>) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }
}

/// An immutable ordered snapshot of message ids. Any change to a conversation (an appended
/// turn, a tool round) produces a *new* conversation with a new id — never an in-place edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message_ids: Vec<Uuid>,
}

impl Conversation {
    /// Construct a new conversation from an ordered, deduplicated message id list.
    pub fn new(message_ids: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            message_ids,
        }
    }

    /// An empty conversation, as created alongside a brand-new agent.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

/// Provider-routing knobs, validated per-field where the provider's own semantics
/// constrain them, with a passthrough bag for anything this crate doesn't yet know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    /// Unrecognized keys, preserved so provider-specific knobs survive a round trip
    /// even though this crate has no typed field for them.
    #[serde(flatten)]
    pub extra: Map<String, serde_json::Value>,
}

impl ModelConfig {
    /// Shallow-merge `override_config` over `self`: any field the override sets wins,
    /// anything it leaves as `None`/empty falls back to `self`. Used by `advance` to
    /// apply per-call overrides over an agent's stored configuration.
    pub fn merged_over(&self, overrides: &ModelConfig) -> ModelConfig {
        let mut merged = self.clone();
        if overrides.temperature.is_some() {
            merged.temperature = overrides.temperature;
        }
        if overrides.max_tokens.is_some() {
            merged.max_tokens = overrides.max_tokens;
        }
        if overrides.top_p.is_some() {
            merged.top_p = overrides.top_p;
        }
        if overrides.top_k.is_some() {
            merged.top_k = overrides.top_k;
        }
        if overrides.stop.is_some() {
            merged.stop = overrides.stop.clone();
        }
        if overrides.frequency_penalty.is_some() {
            merged.frequency_penalty = overrides.frequency_penalty;
        }
        if overrides.presence_penalty.is_some() {
            merged.presence_penalty = overrides.presence_penalty;
        }
        for (key, value) in &overrides.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// One version of an agent: a name, a system prompt, a conversation, a model + its
/// configuration, and an optional parent forming the lineage forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub system_prompt_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub conversation_id: Uuid,
    pub model: String,
    pub model_config: ModelConfig,
}

/// A patch applied by [`crate::Store::with_metadata`] to produce a child agent version
/// that shares the parent's conversation but alters name/model/config.
#[derive(Debug, Clone, Default)]
pub struct AgentMetadataPatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub model_config: Option<ModelConfig>,
}

/// The set of new assets emitted by one `advance` or `create_agent` call, saved atomically
/// by [`crate::Store::save`].
#[derive(Debug, Clone)]
pub struct Bundle {
    pub text_asset: Option<TextAsset>,
    pub conversation: Option<Conversation>,
    pub messages: Vec<Message>,
    pub agent: AgentVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors_set_roles() {
        assert_eq!(Message::user("hi").role, MessageRole::User);
        assert_eq!(Message::system("hi").role, MessageRole::System);
        assert_eq!(Message::assistant_text("hi").role, MessageRole::Assistant);
        assert_eq!(Message::tool_result("c1", "ok").role, MessageRole::Tool);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn test_model_config_merge_prefers_override() {
        let base = ModelConfig {
            temperature: Some(0.2),
            max_tokens: Some(100),
            ..Default::default()
        };
        let overrides = ModelConfig {
            temperature: Some(0.9),
            ..Default::default()
        };
        let merged = base.merged_over(&overrides);
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.max_tokens, Some(100));
    }

    #[test]
    fn test_tool_call_arguments_preserved_verbatim() {
        let raw = r#"{"b": 2, "a": 1}"#;
        let call = ToolCallRecord::new("c1", "add", raw);
        assert_eq!(call.arguments, raw);
    }

    #[test]
    fn test_conversation_empty_has_no_messages() {
        let conv = Conversation::empty();
        assert!(conv.message_ids.is_empty());
    }
}
