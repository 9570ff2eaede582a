//! The persistence layer and the advance engine built on top of it.
//!
//! [`Backend`] is the relational-storage seam with two implementations:
//! [`PostgresBackend`](postgres::PostgresBackend) for production use and
//! [`MemoryBackend`](memory::MemoryBackend) for tests and embedding without a database.
//! [`Store`] wraps a backend and an [`IdentityCache`](crate::cache::IdentityCache) and is
//! the crate's one public entry point: every read goes through the cache first, every
//! write goes through `save_bundle`, and `advance` drives the turn loop described in the
//! module's own doc comments below.

pub mod memory;
pub mod postgres;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{Asset, IdentityCache};
use crate::config::AdvanceOptions;
use crate::error::{Error, NotFoundKind};
use crate::llm::{complete_with_retry, LlmProvider};
use crate::model::{
    AgentMetadataPatch, AgentVersion, Bundle, Conversation, Message, ModelConfig, TextAsset,
};
use crate::tools::ToolProvider;
use crate::Result;

/// The relational-storage seam. Every method here is the single-row/single-transaction
/// primitive; caching and the advance protocol live in [`Store`], one layer up.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Idempotent schema creation. A no-op for backends with nothing to create.
    async fn init_schema(&self) -> Result<()>;

    async fn get_text(&self, id: Uuid) -> Result<Option<TextAsset>>;
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>>;
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn get_agent(&self, id: Uuid) -> Result<Option<AgentVersion>>;

    /// Insert every asset in `bundle` in one transaction, ignoring rows that already
    /// exist (insert-or-ignore, keyed by id — assets are immutable so a conflicting id
    /// can only mean the bundle was already saved).
    async fn save_bundle(&self, bundle: &Bundle) -> Result<()>;

    /// Remove one agent row. Children referencing it as `parent_id` have that field
    /// reset to null rather than being deleted themselves.
    async fn delete_agent(&self, id: Uuid) -> Result<()>;

    /// Three-pass cascade: unreferenced messages, then unreferenced conversations, then
    /// unreferenced text assets. Returns the ids actually removed so the caller can
    /// evict them from the cache.
    async fn gc(&self) -> Result<GcReport>;

    /// Root-first chain of agent versions starting at `id`'s own root and ending at `id`.
    async fn get_lineage(&self, id: Uuid) -> Result<Vec<AgentVersion>>;

    async fn list_agents(&self, limit: i64, offset: i64, name: Option<&str>) -> Result<Vec<AgentVersion>>;
    async fn count_agents(&self, name: Option<&str>) -> Result<i64>;

    /// Exact, case-sensitive match (see [`Store::find_by_name`] for the rationale).
    async fn find_by_name(&self, name: &str) -> Result<Option<AgentVersion>>;
}

/// Ids removed by one [`Backend::gc`] pass, in deletion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub messages: Vec<Uuid>,
    pub conversations: Vec<Uuid>,
    pub text_assets: Vec<Uuid>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.conversations.is_empty() && self.text_assets.is_empty()
    }
}

/// The crate's single public entry point: a cache-first facade over a [`Backend`], plus
/// the advance engine that drives one LLM/tool turn.
pub struct Store {
    backend: Arc<dyn Backend>,
    cache: Arc<dyn IdentityCache>,
    llm: Arc<dyn LlmProvider>,
    default_tools: Arc<dyn ToolProvider>,
}

impl Store {
    /// Connect to Postgres, pairing the backend with the weak-valued cache (§4.1 — a
    /// persistent backend never needs the cache to extend an asset's lifetime).
    pub async fn connect(
        dsn: &str,
        pool_options: crate::config::PoolOptions,
        llm: Arc<dyn LlmProvider>,
        default_tools: Arc<dyn ToolProvider>,
    ) -> Result<Self> {
        let backend = postgres::PostgresBackend::connect(dsn, pool_options).await?;
        Ok(Self {
            backend: Arc::new(backend),
            cache: Arc::new(crate::cache::WeakCache::new()),
            llm,
            default_tools,
        })
    }

    /// An embedded store with no external database, paired with the strong-valued cache
    /// (§4.1 — with no secondary store, the cache is the only place an asset lives).
    pub fn in_memory(llm: Arc<dyn LlmProvider>, default_tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            backend: Arc::new(memory::MemoryBackend::new()),
            cache: Arc::new(crate::cache::StrongCache::new()),
            llm,
            default_tools,
        }
    }

    pub async fn init_schema(&self) -> Result<()> {
        self.backend.init_schema().await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // --- cache-first reads -------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_text(&self, id: Uuid) -> Result<Option<TextAsset>> {
        if let Some(asset) = self.cache.get(id) {
            debug!(%id, "text asset cache hit");
            return Ok(asset.as_text().cloned());
        }
        debug!(%id, "text asset cache miss");
        let Some(text) = self.backend.get_text(id).await? else {
            return Ok(None);
        };
        self.cache.put(Arc::new(Asset::from(text.clone())));
        Ok(Some(text))
    }

    #[instrument(skip(self))]
    pub async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        if let Some(asset) = self.cache.get(id) {
            debug!(%id, "message cache hit");
            return Ok(asset.as_message().cloned());
        }
        debug!(%id, "message cache miss");
        let Some(message) = self.backend.get_message(id).await? else {
            return Ok(None);
        };
        self.cache.put(Arc::new(Asset::from(message.clone())));
        Ok(Some(message))
    }

    #[instrument(skip(self))]
    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        if let Some(asset) = self.cache.get(id) {
            debug!(%id, "conversation cache hit");
            return Ok(asset.as_conversation().cloned());
        }
        debug!(%id, "conversation cache miss");
        let Some(conversation) = self.backend.get_conversation(id).await? else {
            return Ok(None);
        };
        self.cache.put(Arc::new(Asset::from(conversation.clone())));
        Ok(Some(conversation))
    }

    #[instrument(skip(self))]
    pub async fn get_agent(&self, id: Uuid) -> Result<Option<AgentVersion>> {
        if let Some(asset) = self.cache.get(id) {
            debug!(%id, "agent cache hit");
            return Ok(asset.as_agent().cloned());
        }
        debug!(%id, "agent cache miss");
        let Some(agent) = self.backend.get_agent(id).await? else {
            return Ok(None);
        };
        self.cache.put(Arc::new(Asset::from(agent.clone())));
        Ok(Some(agent))
    }

    /// Load an agent, failing with `NotFoundKind::Agent` instead of returning `None`.
    pub async fn load_agent(&self, id: Uuid) -> Result<AgentVersion> {
        self.get_agent(id)
            .await?
            .ok_or_else(|| Error::from(NotFoundKind::Agent(id)))
    }

    /// Resolve every message an agent's conversation references, in order.
    pub async fn get_messages(&self, agent: &AgentVersion) -> Result<Vec<Message>> {
        let conversation = self
            .get_conversation(agent.conversation_id)
            .await?
            .ok_or_else(|| Error::from(NotFoundKind::Conversation(agent.conversation_id)))?;

        let mut messages = Vec::with_capacity(conversation.message_ids.len());
        for id in conversation.message_ids {
            let message = self
                .get_message(id)
                .await?
                .ok_or_else(|| Error::from(NotFoundKind::Message(id)))?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Root-first chain of agent versions from `agent`'s root down to `agent` itself.
    /// Every walked version is primed into the cache before returning.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn get_lineage(&self, agent: &AgentVersion) -> Result<Vec<AgentVersion>> {
        let lineage = self.backend.get_lineage(agent.id).await?;
        for version in &lineage {
            self.cache.put(Arc::new(Asset::from(version.clone())));
        }
        Ok(lineage)
    }

    // --- writes --------------------------------------------------------------

    /// Save every asset in `bundle`, priming the cache first in dependency order
    /// (text asset, then messages, then conversation, then agent) so a reader racing
    /// this call never observes an agent whose dependencies aren't yet resolvable.
    #[instrument(skip(self, bundle), fields(agent_id = %bundle.agent.id))]
    pub async fn save(&self, bundle: Bundle) -> Result<()> {
        if let Some(text) = &bundle.text_asset {
            self.cache.put(Arc::new(Asset::from(text.clone())));
        }
        for message in &bundle.messages {
            self.cache.put(Arc::new(Asset::from(message.clone())));
        }
        if let Some(conversation) = &bundle.conversation {
            self.cache.put(Arc::new(Asset::from(conversation.clone())));
        }
        self.cache.put(Arc::new(Asset::from(bundle.agent.clone())));

        self.backend.save_bundle(&bundle).await?;
        info!(agent_id = %bundle.agent.id, "saved bundle");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_agent(&self, id: Uuid) -> Result<()> {
        self.backend.delete_agent(id).await?;
        self.cache.forget(id);
        info!(agent_id = %id, "deleted agent");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn gc(&self) -> Result<GcReport> {
        let report = self.backend.gc().await?;
        for id in report.messages.iter().chain(&report.conversations).chain(&report.text_assets) {
            self.cache.forget(*id);
        }
        info!(
            removed_messages = report.messages.len(),
            removed_conversations = report.conversations.len(),
            removed_text_assets = report.text_assets.len(),
            "gc complete"
        );
        Ok(report)
    }

    pub async fn list_agents(&self, limit: i64, offset: i64, name: Option<&str>) -> Result<Vec<AgentVersion>> {
        let agents = self.backend.list_agents(limit, offset, name).await?;
        for agent in &agents {
            self.cache.put(Arc::new(Asset::from(agent.clone())));
        }
        Ok(agents)
    }

    pub async fn count_agents(&self, name: Option<&str>) -> Result<i64> {
        self.backend.count_agents(name).await
    }

    /// Exact, case-sensitive lookup — deliberately stricter than [`Store::list_agents`]'s
    /// case-insensitive substring filter. This is a lookup-by-known-name operation (the
    /// caller already has a name verbatim, e.g. from a prior `list_agents` row); the
    /// case-insensitive search box is what `list_agents` is for.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<AgentVersion>> {
        let found = self.backend.find_by_name(name).await?;
        if let Some(agent) = &found {
            self.cache.put(Arc::new(Asset::from(agent.clone())));
        }
        Ok(found)
    }

    // --- agent lifecycle -------------------------------------------------

    /// Create a root agent version: a fresh system-prompt text asset, an empty
    /// conversation, and the agent itself, all cached and saved as one bundle.
    #[instrument(skip(self, system_prompt, model_config))]
    pub async fn create_agent(
        &self,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
        model_config: ModelConfig,
    ) -> Result<AgentVersion> {
        let text = TextAsset::new(system_prompt);
        let conversation = Conversation::empty();
        let agent = AgentVersion {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            name: name.into(),
            system_prompt_id: text.id,
            parent_id: None,
            conversation_id: conversation.id,
            model: model.into(),
            model_config,
        };

        self.save(Bundle {
            text_asset: Some(text),
            conversation: Some(conversation),
            messages: Vec::new(),
            agent: agent.clone(),
        })
        .await?;

        Ok(agent)
    }

    /// Emit a sibling branch: a fresh agent with the same `parent_id`, sharing every
    /// other field (optionally renamed), enabling alternative futures from the same
    /// history as `agent`.
    #[instrument(skip(self, agent))]
    pub async fn clone_agent(&self, agent: &AgentVersion, new_name: Option<&str>) -> Result<AgentVersion> {
        let clone = AgentVersion {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            name: new_name.map(String::from).unwrap_or_else(|| agent.name.clone()),
            system_prompt_id: agent.system_prompt_id,
            parent_id: agent.parent_id,
            conversation_id: agent.conversation_id,
            model: agent.model.clone(),
            model_config: agent.model_config.clone(),
        };

        self.save(Bundle {
            text_asset: None,
            conversation: None,
            messages: Vec::new(),
            agent: clone.clone(),
        })
        .await?;

        Ok(clone)
    }

    /// Emit a child with altered metadata (name/model/config) but the same conversation.
    #[instrument(skip(self, agent, patch))]
    pub async fn with_metadata(&self, agent: &AgentVersion, patch: AgentMetadataPatch) -> Result<AgentVersion> {
        let child = AgentVersion {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            name: patch.name.unwrap_or_else(|| agent.name.clone()),
            system_prompt_id: agent.system_prompt_id,
            parent_id: Some(agent.id),
            conversation_id: agent.conversation_id,
            model: patch.model.unwrap_or_else(|| agent.model.clone()),
            model_config: patch.model_config.unwrap_or_else(|| agent.model_config.clone()),
        };

        self.save(Bundle {
            text_asset: None,
            conversation: None,
            messages: Vec::new(),
            agent: child.clone(),
        })
        .await?;

        Ok(child)
    }

    // --- the turn loop -----------------------------------------------------

    /// Drive one turn: reconstruct history, call the completion provider, execute any
    /// requested tools, and emit a new agent version with the extended conversation.
    #[instrument(skip(self, user_input, opts), fields(agent_id = %agent.id))]
    pub async fn advance(&self, agent: &AgentVersion, user_input: &str, opts: AdvanceOptions) -> Result<AgentVersion> {
        let system_prompt = self
            .get_text(agent.system_prompt_id)
            .await?
            .ok_or_else(|| Error::from(NotFoundKind::SystemPrompt(agent.system_prompt_id)))?;

        let mut working = self.get_messages(agent).await?;
        working.push(Message::user(user_input));

        let tools: &dyn ToolProvider = opts
            .tool_provider
            .as_deref()
            .unwrap_or_else(|| self.default_tools.as_ref());

        let model_config = agent.model_config.merged_over(&opts.model_config_overrides);

        for round in 0..opts.max_tool_rounds {
            let reply = complete_with_retry(
                self.llm.as_ref(),
                &system_prompt.content,
                &working,
                &agent.model,
                &model_config,
                opts.timeout,
                opts.max_retries,
            )
            .await?;

            let pending_calls = reply.tool_calls.clone();
            working.push(reply);

            if pending_calls.is_empty() {
                break;
            }

            let futures = pending_calls.iter().map(|call| {
                let tool_name = call.name.clone();
                let arguments = call.arguments.clone();
                async move { tools.execute(&tool_name, &arguments).await }
            });
            let results = join_all(futures).await;

            for (call, result) in pending_calls.into_iter().zip(results) {
                let content = match result {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(tool = %call.name, error = %err, "tool execution failed");
                        format!("Error: {err}")
                    }
                };
                working.push(Message::tool_result(call.call_id, content));
            }

            if round + 1 == opts.max_tool_rounds {
                warn!(agent_id = %agent.id, round, "max_tool_rounds reached; ending turn without a final completion");
                break;
            }
        }

        let conversation = Conversation::new(working.iter().map(|m| m.id).collect());
        let new_agent = AgentVersion {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            name: agent.name.clone(),
            system_prompt_id: agent.system_prompt_id,
            parent_id: Some(agent.id),
            conversation_id: conversation.id,
            model: agent.model.clone(),
            model_config,
        };

        self.save(Bundle {
            text_asset: None,
            conversation: Some(conversation),
            messages: working,
            agent: new_agent.clone(),
        })
        .await?;

        info!(agent_id = %agent.id, new_agent_id = %new_agent.id, "advanced agent");
        Ok(new_agent)
    }
}

// Re-exported so callers don't need to reach into `store::postgres`/`store::memory`
// directly for the common case.
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
