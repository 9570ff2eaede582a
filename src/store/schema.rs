//! DDL for the Postgres backend. Kept as one string per statement so
//! `PostgresBackend::init_schema` can issue them individually and surface which
//! statement failed.

pub const CREATE_TEXT_ASSETS: &str = r#"
CREATE TABLE IF NOT EXISTS text_assets (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    content TEXT NOT NULL
)
"#;

pub const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    role TEXT NOT NULL,
    content TEXT NULL,
    tool_calls JSONB NOT NULL DEFAULT '[]',
    tool_call_id TEXT NULL,
    input_tokens INT NULL,
    output_tokens INT NULL
)
"#;

pub const CREATE_CONVERSATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    message_ids UUID[] NOT NULL DEFAULT '{}'
)
"#;

pub const CREATE_AGENTS: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    name TEXT NOT NULL,
    system_prompt_id UUID NOT NULL REFERENCES text_assets(id),
    parent_id UUID NULL REFERENCES agents(id) ON DELETE SET NULL,
    conversation_id UUID NOT NULL REFERENCES conversations(id),
    model TEXT NOT NULL,
    model_config JSONB NOT NULL DEFAULT '{}'
)
"#;

pub const CREATE_INDEX_AGENTS_CONVERSATION_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_conversation_id ON agents(conversation_id)";

pub const CREATE_INDEX_AGENTS_NAME_LOWER: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_name_lower ON agents(lower(name))";

pub const CREATE_INDEX_AGENTS_CREATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_agents_created_at ON agents(created_at DESC)";

/// Every statement `init_schema` runs, in dependency order.
pub const ALL_STATEMENTS: &[&str] = &[
    CREATE_TEXT_ASSETS,
    CREATE_MESSAGES,
    CREATE_CONVERSATIONS,
    CREATE_AGENTS,
    CREATE_INDEX_AGENTS_CONVERSATION_ID,
    CREATE_INDEX_AGENTS_NAME_LOWER,
    CREATE_INDEX_AGENTS_CREATED_AT,
];

/// Recursive self-join climbing `parent_id` from `$1`, returned child-first; the
/// caller reverses it to produce the root-first order the `get_lineage` contract promises.
pub const LINEAGE_QUERY: &str = r#"
WITH RECURSIVE lineage AS (
  SELECT * FROM agents WHERE id = $1
  UNION ALL
  SELECT a.* FROM agents a INNER JOIN lineage l ON a.id = l.parent_id
) SELECT * FROM lineage
"#;
