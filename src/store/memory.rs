//! In-process backend: a single `Mutex`-guarded set of maps. No external database,
//! paired with the strong-valued cache — there is no secondary store to recover an
//! evicted entry from, so [`Store::in_memory`](crate::store::Store::in_memory) is the
//! only place assets actually live.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{Error, NotFoundKind};
use crate::model::{AgentVersion, Bundle, Conversation, Message, TextAsset};
use crate::store::{Backend, GcReport};
use crate::Result;

#[derive(Default)]
struct Tables {
    text_assets: HashMap<Uuid, TextAsset>,
    messages: HashMap<Uuid, Message>,
    conversations: HashMap<Uuid, Conversation>,
    agents: HashMap<Uuid, AgentVersion>,
}

/// In-memory [`Backend`]. All operations lock the same mutex, so `save_bundle`/`gc`/
/// `delete_agent` are trivially atomic with respect to each other.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn get_text(&self, id: Uuid) -> Result<Option<TextAsset>> {
        Ok(self.tables.lock().expect("memory backend mutex poisoned").text_assets.get(&id).cloned())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.tables.lock().expect("memory backend mutex poisoned").messages.get(&id).cloned())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .tables
            .lock()
            .expect("memory backend mutex poisoned")
            .conversations
            .get(&id)
            .cloned())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<AgentVersion>> {
        Ok(self.tables.lock().expect("memory backend mutex poisoned").agents.get(&id).cloned())
    }

    async fn save_bundle(&self, bundle: &Bundle) -> Result<()> {
        let mut tables = self.tables.lock().expect("memory backend mutex poisoned");

        if let Some(text) = &bundle.text_asset {
            tables.text_assets.entry(text.id).or_insert_with(|| text.clone());
        }
        for message in &bundle.messages {
            tables.messages.entry(message.id).or_insert_with(|| message.clone());
        }
        if let Some(conversation) = &bundle.conversation {
            tables
                .conversations
                .entry(conversation.id)
                .or_insert_with(|| conversation.clone());
        }
        tables.agents.entry(bundle.agent.id).or_insert_with(|| bundle.agent.clone());

        Ok(())
    }

    async fn delete_agent(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().expect("memory backend mutex poisoned");
        tables.agents.remove(&id);
        for agent in tables.agents.values_mut() {
            if agent.parent_id == Some(id) {
                agent.parent_id = None;
            }
        }
        Ok(())
    }

    async fn gc(&self) -> Result<GcReport> {
        let mut tables = self.tables.lock().expect("memory backend mutex poisoned");
        let mut report = GcReport::default();

        let referenced_conversations: std::collections::HashSet<Uuid> =
            tables.agents.values().map(|a| a.conversation_id).collect();
        let referenced_messages: std::collections::HashSet<Uuid> = tables
            .conversations
            .iter()
            .filter(|(id, _)| referenced_conversations.contains(id))
            .flat_map(|(_, c)| c.message_ids.iter().copied())
            .collect();

        let dead_messages: Vec<Uuid> = tables
            .messages
            .keys()
            .filter(|id| !referenced_messages.contains(id))
            .copied()
            .collect();
        for id in &dead_messages {
            tables.messages.remove(id);
        }
        report.messages = dead_messages;

        let dead_conversations: Vec<Uuid> = tables
            .conversations
            .keys()
            .filter(|id| !referenced_conversations.contains(id))
            .copied()
            .collect();
        for id in &dead_conversations {
            tables.conversations.remove(id);
        }
        report.conversations = dead_conversations;

        let referenced_text: std::collections::HashSet<Uuid> =
            tables.agents.values().map(|a| a.system_prompt_id).collect();
        let dead_text: Vec<Uuid> = tables
            .text_assets
            .keys()
            .filter(|id| !referenced_text.contains(id))
            .copied()
            .collect();
        for id in &dead_text {
            tables.text_assets.remove(id);
        }
        report.text_assets = dead_text;

        Ok(report)
    }

    async fn get_lineage(&self, id: Uuid) -> Result<Vec<AgentVersion>> {
        let tables = self.tables.lock().expect("memory backend mutex poisoned");
        let mut chain = Vec::new();
        let mut current = Some(id);

        while let Some(current_id) = current {
            let agent = tables
                .agents
                .get(&current_id)
                .ok_or_else(|| Error::from(NotFoundKind::Agent(current_id)))?;
            chain.push(agent.clone());
            current = agent.parent_id;
        }

        chain.reverse();
        Ok(chain)
    }

    async fn list_agents(&self, limit: i64, offset: i64, name: Option<&str>) -> Result<Vec<AgentVersion>> {
        let tables = self.tables.lock().expect("memory backend mutex poisoned");
        let mut matching: Vec<AgentVersion> = tables
            .agents
            .values()
            .filter(|a| match name {
                Some(needle) => a.name.to_lowercase().contains(&needle.to_lowercase()),
                None => true,
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let start = offset.max(0) as usize;
        let end = (start + limit.max(0) as usize).min(matching.len());
        Ok(if start >= matching.len() {
            Vec::new()
        } else {
            matching[start..end].to_vec()
        })
    }

    async fn count_agents(&self, name: Option<&str>) -> Result<i64> {
        let tables = self.tables.lock().expect("memory backend mutex poisoned");
        let count = tables
            .agents
            .values()
            .filter(|a| match name {
                Some(needle) => a.name.to_lowercase().contains(&needle.to_lowercase()),
                None => true,
            })
            .count();
        Ok(count as i64)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AgentVersion>> {
        let tables = self.tables.lock().expect("memory backend mutex poisoned");
        Ok(tables.agents.values().find(|a| a.name == name).cloned())
    }
}
