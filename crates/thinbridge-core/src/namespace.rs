use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse routing category derived from a message name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Namespace {
    /// `pri(...)` -- private wallet RPC issued by this process.
    InternalPrivate,
    /// `pub(...)` -- public RPC relayed for a third-party page.
    InternalPublic,
    /// `evm(...)` -- EVM provider RPC relayed for a third-party page.
    Provider,
    Unknown,
}

impl Namespace {
    /// Whether replies for this namespace bypass the correlation registry and
    /// go to the dApp event bus instead.
    pub fn is_relayed(self) -> bool {
        matches!(self, Namespace::InternalPublic | Namespace::Provider)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::InternalPrivate => write!(f, "internal_private"),
            Namespace::InternalPublic => write!(f, "internal_public"),
            Namespace::Provider => write!(f, "provider"),
            Namespace::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify a message name. Never fails: unrecognized prefixes are `Unknown`
/// so unsolicited or legacy replies can still be delivered.
pub fn classify(message: &str) -> Namespace {
    if message.starts_with("pri(") {
        Namespace::InternalPrivate
    } else if message.starts_with("pub(") {
        Namespace::InternalPublic
    } else if message.starts_with("evm(") {
        Namespace::Provider
    } else {
        Namespace::Unknown
    }
}

/// Per-correlation-id namespace cache.
///
/// An entry lives from dispatch until the id settles, is rejected by a
/// reload, or fails to write. Relayed entries end with their first
/// `response` or `error` unless the bridge holds them open.
#[derive(Debug, Default)]
pub struct NamespaceMap {
    entries: HashMap<String, Namespace>,
}

impl NamespaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `message` and cache the result under `id`.
    pub fn record(&mut self, id: &str, message: &str) -> Namespace {
        let namespace = classify(message);
        self.entries.insert(id.to_string(), namespace);
        namespace
    }

    pub fn get(&self, id: &str) -> Option<Namespace> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn forget(&mut self, id: &str) -> Option<Namespace> {
        self.entries.remove(id)
    }

    /// Drop every relayed (`Provider`/`InternalPublic`) entry. Returns how
    /// many were dropped.
    pub fn forget_relayed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, ns| !ns.is_relayed());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
