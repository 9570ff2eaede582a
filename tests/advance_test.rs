//! End-to-end scenarios for the advance engine, run against `MemoryBackend` with
//! scripted `LlmProvider`/`ToolProvider` test doubles standing in for a real model and
//! real tools.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use immagent::*;
use serde_json::json;

/// Plays back a fixed queue of assistant replies, one per `complete` call.
struct ScriptedLlm {
    replies: Mutex<Vec<Message>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _model: &str,
        _config: &ModelConfig,
        _timeout: Duration,
    ) -> Result<Message> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(Error::llm_permanent("scripted replies exhausted"));
        }
        Ok(replies.remove(0))
    }
}

/// A handful of fixed tool handlers, one of which sleeps to let us prove that
/// out-of-order completion doesn't reorder the emitted tool messages.
struct ScriptedTools;

#[async_trait]
impl ToolProvider for ScriptedTools {
    async fn execute(&self, tool_name: &str, _arguments_json: &str) -> Result<String> {
        match tool_name {
            "clock" => Ok(json!({ "time": "12:00 UTC" }).to_string()),
            "slow_first" => {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("slow".to_string())
            }
            "fast_second" => Ok("fast".to_string()),
            "always_calls_back" => Ok("unused".to_string()),
            other => Err(Error::tool_execution(other, "no such tool")),
        }
    }
}

fn store_with(llm: ScriptedLlm) -> Store {
    Store::in_memory(std::sync::Arc::new(llm), std::sync::Arc::new(ScriptedTools))
}

/// Scenario 1: create an agent, advance it once with no tool calls.
#[tokio::test]
async fn test_create_and_advance_without_tools() {
    let store = store_with(ScriptedLlm::new(vec![Message::assistant_text("pong")]));

    let root = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();

    let advanced = store
        .advance(&root, "ping", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    assert_eq!(advanced.parent_id, Some(root.id));

    let messages = store.get_messages(&advanced).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content.as_deref(), Some("ping"));
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content.as_deref(), Some("pong"));

    let reloaded = store.load_agent(advanced.id).await.unwrap();
    assert_eq!(reloaded, advanced);
}

/// Scenario 2: one tool round, then a plain-text reply.
#[tokio::test]
async fn test_single_tool_round() {
    let store = store_with(ScriptedLlm::new(vec![
        Message::assistant_tool_calls(None, vec![ToolCallRecord::new("c1", "clock", "{}")]),
        Message::assistant_text("12:00"),
    ]));

    let root = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();

    let advanced = store
        .advance(&root, "what time is it?", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    let messages = store.get_messages(&advanced).await.unwrap();
    let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool, MessageRole::Assistant]
    );
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert!(messages[2].content.as_deref().unwrap().contains("12:00 UTC"));
    assert_eq!(messages[3].content.as_deref(), Some("12:00"));
}

/// Scenario 3: two tool calls in one round, the first resolves slower than the second,
/// but the emitted order still follows the original call order.
#[tokio::test]
async fn test_concurrent_tool_calls_preserve_request_order() {
    let store = store_with(ScriptedLlm::new(vec![
        Message::assistant_tool_calls(
            None,
            vec![
                ToolCallRecord::new("c1", "slow_first", "{}"),
                ToolCallRecord::new("c2", "fast_second", "{}"),
            ],
        ),
        Message::assistant_text("done"),
    ]));

    let root = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();

    let advanced = store
        .advance(&root, "go", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    let messages = store.get_messages(&advanced).await.unwrap();
    let tool_messages: Vec<&Message> = messages.iter().filter(|m| m.role == MessageRole::Tool).collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_messages[0].content.as_deref(), Some("slow"));
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(tool_messages[1].content.as_deref(), Some("fast"));
}

/// Scenario 4: the model keeps requesting tools forever; the round cap still produces
/// a usable agent version instead of erroring.
#[tokio::test]
async fn test_bounded_tool_rounds_terminates_without_error() {
    let always_a_tool_call = || {
        Message::assistant_tool_calls(
            None,
            vec![ToolCallRecord::new("c", "always_calls_back", "{}")],
        )
    };
    let store = store_with(ScriptedLlm::new(vec![
        always_a_tool_call(),
        always_a_tool_call(),
        always_a_tool_call(),
        always_a_tool_call(),
    ]));

    let root = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();

    let advanced = store
        .advance(
            &root,
            "loop forever",
            AdvanceOptions::builder().max_tool_rounds(3).build().unwrap(),
        )
        .await
        .unwrap();

    let messages = store.get_messages(&advanced).await.unwrap();
    assert!(!messages.is_empty());
    assert_eq!(advanced.parent_id, Some(root.id));
}

/// Scenario 5: lineage walking and garbage collection after deleting a middle version.
#[tokio::test]
async fn test_lineage_and_gc_after_deleting_a_parent() {
    let store = store_with(ScriptedLlm::new(vec![
        Message::assistant_text("one"),
        Message::assistant_text("two"),
    ]));

    let a0 = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();
    let a1 = store
        .advance(&a0, "first", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();
    let a2 = store
        .advance(&a1, "second", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    let lineage = store.get_lineage(&a2).await.unwrap();
    assert_eq!(lineage.iter().map(|a| a.id).collect::<Vec<_>>(), vec![a0.id, a1.id, a2.id]);

    store.delete_agent(a1.id).await.unwrap();
    // The cache is an accelerator, not a consistency boundary (§4.1) — a caller that
    // wants a post-delete read to reflect the backend's foreign-key fix-up clears it.
    store.clear_cache();

    let reloaded_a2 = store.load_agent(a2.id).await.unwrap();
    assert_eq!(reloaded_a2.parent_id, None);

    let lineage_after_delete = store.get_lineage(&reloaded_a2).await.unwrap();
    assert_eq!(lineage_after_delete.iter().map(|a| a.id).collect::<Vec<_>>(), vec![a2.id]);

    let report = store.gc().await.unwrap();
    assert!(!report.messages.is_empty() || !report.conversations.is_empty());

    let second_pass = store.gc().await.unwrap();
    assert!(second_pass.is_empty());
}

/// Scenario 6: a clone is a sibling, not a child, and the two branches diverge
/// independently.
#[tokio::test]
async fn test_clone_agent_produces_a_sibling() {
    let store = store_with(ScriptedLlm::new(vec![
        Message::assistant_text("reply-1"),
        Message::assistant_text("reply-2a"),
        Message::assistant_text("reply-2b"),
    ]));

    let a0 = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();
    let a1 = store
        .advance(&a0, "x", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    let a1_clone = store.clone_agent(&a1, None).await.unwrap();
    assert_eq!(a1_clone.parent_id, a1.parent_id);
    assert_ne!(a1_clone.id, a1.id);

    let a2 = store
        .advance(&a1, "continue original", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();
    let a2_clone = store
        .advance(&a1_clone, "continue clone", AdvanceOptions::builder().build().unwrap())
        .await
        .unwrap();

    assert_eq!(a2.parent_id, Some(a1.id));
    assert_eq!(a2_clone.parent_id, Some(a1_clone.id));
    assert_ne!(a2.conversation_id, a2_clone.conversation_id);
}

/// `with_metadata` emits a child, not a sibling — the opposite of `clone_agent`.
#[tokio::test]
async fn test_with_metadata_produces_a_child() {
    let store = store_with(ScriptedLlm::new(vec![]));

    let a0 = store
        .create_agent("assistant", "You are helpful.", "claude-3-5-haiku", ModelConfig::default())
        .await
        .unwrap();

    let patched = store
        .with_metadata(
            &a0,
            AgentMetadataPatch {
                name: Some("renamed".to_string()),
                model: None,
                model_config: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(patched.parent_id, Some(a0.id));
    assert_eq!(patched.name, "renamed");
    assert_eq!(patched.conversation_id, a0.conversation_id);
}
