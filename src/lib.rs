//! # ImmAgent
//!
//! An immutable agent state store for LLM-backed conversational agents: every turn
//! produces a new agent *version* whose parent pointer references the previous one,
//! never mutating it. That buys three things for free: safe in-memory caching (a value
//! frozen at creation can be shared without synchronization once read), full history (a
//! lineage is a pointer walk), and reproducibility (any version's conversation can be
//! rebuilt from its id alone).
//!
//! ## Shape
//!
//! - An **asset model** ([`model`]) of frozen values — [`TextAsset`], [`Message`],
//!   [`Conversation`], [`AgentVersion`] — connected only by UUID reference.
//! - An **identity cache** ([`cache`]) in front of the backend: weak-valued for a
//!   persistent store, strong-valued for the in-memory one.
//! - A **persistence layer** ([`store`]) behind the [`store::Backend`] trait, with a
//!   Postgres implementation and an in-process one, wrapped by [`Store`] which adds
//!   caching and the turn loop.
//! - Pluggable **LLM** ([`llm`]) and **tool** ([`tools`]) adapters the advance engine
//!   drives each turn.
//!
//! ## Example
//!
//! ```rust,no_run
//! use immagent::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let llm = Arc::new(OpenAiCompatProvider::from_env("http://localhost:11434/v1")?);
//! let tools = Arc::new(ToolRegistry::builder().build());
//! let store = Store::in_memory(llm, tools);
//!
//! let agent = store
//!     .create_agent("assistant", "You are helpful.", "qwen3:8b", ModelConfig::default())
//!     .await?;
//!
//! let agent = store.advance(&agent, "hello", AdvanceOptions::builder().build()?).await?;
//! let messages = store.get_messages(&agent).await?;
//! # let _ = messages;
//! # Ok(())
//! # }
//! ```

// These modules are private (internal implementation details) unless explicitly
// re-exported through `pub use` statements below.

/// The identity cache: `IdentityCache` trait plus its weak- and strong-valued
/// implementations, and the `Asset` enum they hold.
mod cache;

/// Validated option types (`PoolOptions`, `AdvanceOptions`) built with the same
/// validating-builder idiom used throughout the crate.
mod config;

/// Error types and conversions shared across every public API.
mod error;

/// The LLM adapter: `LlmProvider` trait, the retry-wrapped call path, and the reference
/// `OpenAiCompatProvider`.
mod llm;

/// Core data model: the four immutable asset kinds plus the `Bundle` one `advance`
/// or `create_agent` call emits.
mod model;

/// Retry with exponential backoff and jitter, used exclusively by the LLM adapter.
pub mod retry;

/// The persistence layer and advance engine: `Backend`, `Store`, `PostgresBackend`,
/// `MemoryBackend`.
mod store;

/// The tool adapter: `ToolProvider` trait and the reference in-process `ToolRegistry`.
mod tools;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use cache::{Asset, IdentityCache, StrongCache, WeakCache};

pub use config::{AdvanceOptions, AdvanceOptionsBuilder, PoolOptions, PoolOptionsBuilder};

pub use error::{Error, NotFoundKind, Result};

pub use llm::{LlmProvider, OpenAiCompatProvider};

pub use model::{
    AgentMetadataPatch, AgentVersion, Bundle, Conversation, Message, MessageRole, ModelConfig,
    TextAsset, ToolCallRecord,
};

pub use store::{memory::MemoryBackend, postgres::PostgresBackend, Backend, GcReport, Store};

pub use tools::{ToolProvider, ToolRegistry, ToolRegistryBuilder};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The common set of types needed to create a store, advance an agent, and inspect
/// its history. Import with `use immagent::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AdvanceOptions, AgentMetadataPatch, AgentVersion, Backend, Conversation, Error, Message,
        MessageRole, ModelConfig, OpenAiCompatProvider, PoolOptions, Result, Store, TextAsset,
        ToolRegistry,
    };
}
