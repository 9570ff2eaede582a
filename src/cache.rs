//! The identity cache: a process-local, thread-safe map from UUID to asset.
//!
//! Two implementations share one contract ([`IdentityCache`]). The cache is *not* a
//! consistency boundary — it's an accelerator in front of the authoritative backend.
//! Critical sections are a single `HashMap` operation and never `.await`, matching the
//! "coarse-grained mutual exclusion, O(1), never suspend" rule in §4.1.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::model::{AgentVersion, Conversation, Message, TextAsset};

/// The union of everything the cache can hold, keyed by its own `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Text(TextAsset),
    Message(Message),
    Conversation(Conversation),
    Agent(AgentVersion),
}

impl Asset {
    pub fn id(&self) -> Uuid {
        match self {
            Asset::Text(a) => a.id,
            Asset::Message(a) => a.id,
            Asset::Conversation(a) => a.id,
            Asset::Agent(a) => a.id,
        }
    }

    pub fn as_text(&self) -> Option<&TextAsset> {
        match self {
            Asset::Text(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Asset::Message(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_conversation(&self) -> Option<&Conversation> {
        match self {
            Asset::Conversation(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentVersion> {
        match self {
            Asset::Agent(a) => Some(a),
            _ => None,
        }
    }
}

impl From<TextAsset> for Asset {
    fn from(a: TextAsset) -> Self {
        Asset::Text(a)
    }
}
impl From<Message> for Asset {
    fn from(a: Message) -> Self {
        Asset::Message(a)
    }
}
impl From<Conversation> for Asset {
    fn from(a: Conversation) -> Self {
        Asset::Conversation(a)
    }
}
impl From<AgentVersion> for Asset {
    fn from(a: AgentVersion) -> Self {
        Asset::Agent(a)
    }
}

/// Shared contract between the weak (persistent-backend) and strong (in-memory-backend)
/// cache implementations.
pub trait IdentityCache: Send + Sync {
    /// Return the single canonical instance for `id`, if still live.
    fn get(&self, id: Uuid) -> Option<Arc<Asset>>;

    /// Register an asset. Idempotent: putting the same id twice with field-equal values
    /// is a no-op. Putting the same id twice with *different* values is a programmer
    /// error — assets are immutable, so this only debug-asserts rather than erroring,
    /// since by construction this crate never generates two distinct values for one id.
    fn put(&self, asset: Arc<Asset>);

    /// Remove one entry, if present.
    fn forget(&self, id: Uuid);

    /// Drop every entry.
    fn clear(&self);
}

/// Weak-valued cache used in front of a persistent backend. Entries are observer-only:
/// the cache never extends an asset's lifetime. Once the last `Arc` a client holds is
/// dropped, the entry silently evaporates and the next `get` falls through to the backend.
#[derive(Default)]
pub struct WeakCache {
    entries: Mutex<HashMap<Uuid, Weak<Asset>>>,
}

impl WeakCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for WeakCache {
    fn get(&self, id: Uuid) -> Option<Arc<Asset>> {
        let entries = self.entries.lock().expect("cache mutex poisoned");
        entries.get(&id).and_then(Weak::upgrade)
    }

    fn put(&self, asset: Arc<Asset>) {
        let id = asset.id();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(existing) = entries.get(&id).and_then(Weak::upgrade) {
            debug_assert!(*existing == *asset, "asset {id} put with a distinct value");
            return;
        }
        entries.insert(id, Arc::downgrade(&asset));
    }

    fn forget(&self, id: Uuid) {
        self.entries.lock().expect("cache mutex poisoned").remove(&id);
    }

    fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }
}

/// Strong-valued cache used in front of the in-memory backend. There is no secondary
/// store to recover an evicted entry from, so entries live until explicit removal.
#[derive(Default)]
pub struct StrongCache {
    entries: Mutex<HashMap<Uuid, Arc<Asset>>>,
}

impl StrongCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for StrongCache {
    fn get(&self, id: Uuid) -> Option<Arc<Asset>> {
        self.entries.lock().expect("cache mutex poisoned").get(&id).cloned()
    }

    fn put(&self, asset: Arc<Asset>) {
        let id = asset.id();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(existing) = entries.get(&id) {
            debug_assert!(**existing == *asset, "asset {id} put with a distinct value");
            return;
        }
        entries.insert(id, asset);
    }

    fn forget(&self, id: Uuid) {
        self.entries.lock().expect("cache mutex poisoned").remove(&id);
    }

    fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }
}
