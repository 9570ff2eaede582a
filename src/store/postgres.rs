//! Postgres-backed [`Backend`]. Paired with the weak-valued cache — this backend is the
//! authoritative store, so the cache only ever accelerates reads it already proved out.

use std::collections::HashSet;

use serde_json::Value as Json;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::config::PoolOptions;
use crate::error::{Error, NotFoundKind};
use crate::model::{AgentVersion, Bundle, Conversation, Message, MessageRole, ModelConfig, TextAsset, ToolCallRecord};
use crate::store::{schema, Backend, GcReport};
use crate::Result;

pub struct PostgresBackend {
    pool: sqlx::PgPool,
}

impl PostgresBackend {
    pub async fn connect(dsn: &str, options: PoolOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(options.min_size())
            .max_connections(options.max_size())
            .idle_timeout(Some(options.max_inactive_connection_lifetime()))
            .connect(dsn)
            .await
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut => Error::PoolExhausted,
                other => Error::Database(other),
            })?;
        Ok(Self { pool })
    }

    /// Construct directly from an already-built pool, for callers composing their own
    /// connection lifecycle.
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_text_asset(row: &PgRow) -> Result<TextAsset> {
    Ok(TextAsset {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        content: row.try_get("content")?,
    })
}

fn row_to_message(row: &PgRow) -> Result<Message> {
    let role_str: String = row.try_get("role")?;
    let role = MessageRole::parse(&role_str)
        .ok_or_else(|| Error::integrity(format!("unknown message role in database: {role_str}")))?;
    let tool_calls_json: Json = row.try_get("tool_calls")?;
    let tool_calls: Vec<ToolCallRecord> = serde_json::from_value(tool_calls_json)
        .map_err(|e| Error::integrity(format!("malformed tool_calls column: {e}")))?;

    Ok(Message {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        role,
        content: row.try_get("content")?,
        tool_calls,
        tool_call_id: row.try_get("tool_call_id")?,
        input_tokens: row.try_get("input_tokens")?,
        output_tokens: row.try_get("output_tokens")?,
    })
}

fn row_to_conversation(row: &PgRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        message_ids: row.try_get("message_ids")?,
    })
}

fn row_to_agent(row: &PgRow) -> Result<AgentVersion> {
    let model_config_json: Json = row.try_get("model_config")?;
    let model_config: ModelConfig = serde_json::from_value(model_config_json)
        .map_err(|e| Error::integrity(format!("malformed model_config column: {e}")))?;

    Ok(AgentVersion {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        name: row.try_get("name")?,
        system_prompt_id: row.try_get("system_prompt_id")?,
        parent_id: row.try_get("parent_id")?,
        conversation_id: row.try_get("conversation_id")?,
        model: row.try_get("model")?,
        model_config,
    })
}

async fn insert_text_asset(tx: &mut Transaction<'_, Postgres>, text: &TextAsset) -> Result<()> {
    sqlx::query("INSERT INTO text_assets (id, created_at, content) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING")
        .bind(text.id)
        .bind(text.created_at)
        .bind(&text.content)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_message(tx: &mut Transaction<'_, Postgres>, message: &Message) -> Result<()> {
    let tool_calls_json = serde_json::to_value(&message.tool_calls)
        .map_err(|e| Error::integrity(format!("failed to serialize tool_calls: {e}")))?;
    sqlx::query(
        "INSERT INTO messages (id, created_at, role, content, tool_calls, tool_call_id, input_tokens, output_tokens) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING",
    )
    .bind(message.id)
    .bind(message.created_at)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(tool_calls_json)
    .bind(&message.tool_call_id)
    .bind(message.input_tokens)
    .bind(message.output_tokens)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_conversation(tx: &mut Transaction<'_, Postgres>, conversation: &Conversation) -> Result<()> {
    sqlx::query("INSERT INTO conversations (id, created_at, message_ids) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING")
        .bind(conversation.id)
        .bind(conversation.created_at)
        .bind(&conversation.message_ids)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_agent(tx: &mut Transaction<'_, Postgres>, agent: &AgentVersion) -> Result<()> {
    let model_config_json = serde_json::to_value(&agent.model_config)
        .map_err(|e| Error::integrity(format!("failed to serialize model_config: {e}")))?;
    sqlx::query(
        "INSERT INTO agents (id, created_at, name, system_prompt_id, parent_id, conversation_id, model, model_config) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING",
    )
    .bind(agent.id)
    .bind(agent.created_at)
    .bind(&agent.name)
    .bind(agent.system_prompt_id)
    .bind(agent.parent_id)
    .bind(agent.conversation_id)
    .bind(&agent.model)
    .bind(model_config_json)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl Backend for PostgresBackend {
    async fn init_schema(&self) -> Result<()> {
        for statement in schema::ALL_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn get_text(&self, id: Uuid) -> Result<Option<TextAsset>> {
        let row = sqlx::query("SELECT id, created_at, content FROM text_assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_text_asset).transpose()
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT id, created_at, role, content, tool_calls, tool_call_id, input_tokens, output_tokens \
             FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT id, created_at, message_ids FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<AgentVersion>> {
        let row = sqlx::query(
            "SELECT id, created_at, name, system_prompt_id, parent_id, conversation_id, model, model_config \
             FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn save_bundle(&self, bundle: &Bundle) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(text) = &bundle.text_asset {
            insert_text_asset(&mut tx, text).await?;
        }
        for message in &bundle.messages {
            insert_message(&mut tx, message).await?;
        }
        if let Some(conversation) = &bundle.conversation {
            insert_conversation(&mut tx, conversation).await?;
        }
        insert_agent(&mut tx, &bundle.agent).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_agent(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn gc(&self) -> Result<GcReport> {
        let mut tx = self.pool.begin().await?;

        let dead_messages: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM messages WHERE id NOT IN ( \
               SELECT unnest(message_ids) FROM conversations WHERE id IN (SELECT conversation_id FROM agents) \
             ) RETURNING id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let dead_conversations: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM conversations WHERE id NOT IN (SELECT conversation_id FROM agents) RETURNING id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let dead_text_assets: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM text_assets WHERE id NOT IN (SELECT system_prompt_id FROM agents) RETURNING id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(GcReport {
            messages: dead_messages,
            conversations: dead_conversations,
            text_assets: dead_text_assets,
        })
    }

    async fn get_lineage(&self, id: Uuid) -> Result<Vec<AgentVersion>> {
        let rows = sqlx::query(schema::LINEAGE_QUERY).bind(id).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(Error::from(NotFoundKind::Agent(id)));
        }

        let mut chain: Vec<AgentVersion> = rows.iter().map(row_to_agent).collect::<Result<_>>()?;

        // The recursive query returns child-first; check every parent link resolved
        // before reversing into the root-first order the contract promises.
        let ids: HashSet<Uuid> = chain.iter().map(|a| a.id).collect();
        for agent in &chain {
            if let Some(parent_id) = agent.parent_id {
                if !ids.contains(&parent_id) {
                    return Err(Error::from(NotFoundKind::Agent(parent_id)));
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    async fn list_agents(&self, limit: i64, offset: i64, name: Option<&str>) -> Result<Vec<AgentVersion>> {
        let pattern = name.map(|n| format!("%{}%", n.to_lowercase()));
        let rows = sqlx::query(
            "SELECT id, created_at, name, system_prompt_id, parent_id, conversation_id, model, model_config \
             FROM agents WHERE ($1::text IS NULL OR lower(name) LIKE $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_agent).collect()
    }

    async fn count_agents(&self, name: Option<&str>) -> Result<i64> {
        let pattern = name.map(|n| format!("%{}%", n.to_lowercase()));
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agents WHERE ($1::text IS NULL OR lower(name) LIKE $1)",
        )
        .bind(pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AgentVersion>> {
        let row = sqlx::query(
            "SELECT id, created_at, name, system_prompt_id, parent_id, conversation_id, model, model_config \
             FROM agents WHERE name = $1 LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_agent).transpose()
    }
}
