use std::collections::HashMap;

use serde_json::Value;

use crate::error::BridgeError;

/// Settles the caller's future. Invoked at most once.
pub type Completion = Box<dyn FnOnce(Result<Value, BridgeError>) + Send>;

/// Receives streamed subscription values. May be invoked any number of times.
pub type Subscriber = Box<dyn FnMut(Value) + Send>;

/// Whether an entry settles once or keeps streaming.
pub enum EntryKind {
    Completion,
    Stream(Subscriber),
}

/// One in-flight request owned by the [`Registry`].
pub struct PendingRequest {
    completion: Option<Completion>,
    kind: EntryKind,
}

impl PendingRequest {
    pub fn new(completion: Completion, subscriber: Option<Subscriber>) -> Self {
        let kind = match subscriber {
            Some(subscriber) => EntryKind::Stream(subscriber),
            None => EntryKind::Completion,
        };
        Self {
            completion: Some(completion),
            kind,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, EntryKind::Stream(_))
    }

    /// Whether the completion has already been consumed.
    pub fn is_settled(&self) -> bool {
        self.completion.is_none()
    }

    /// Settle the completion if it has not been settled yet.
    pub fn settle(&mut self, result: Result<Value, BridgeError>) -> bool {
        match self.completion.take() {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("stream", &self.is_stream())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// What happened to an entry as a result of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No entry was registered under the id.
    Missing,
    /// The entry was delivered to and is still registered.
    Kept,
    /// The entry was delivered to and removed.
    Removed,
}

/// Keyed store of everything currently outstanding.
///
/// All operations are synchronous and every operation on an absent id is a
/// no-op. Completions and subscribers run inline and must not call back into
/// the bridge that owns this registry.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, PendingRequest>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: &str,
        completion: Completion,
        subscriber: Option<Subscriber>,
    ) -> Result<(), BridgeError> {
        if self.entries.contains_key(id) {
            return Err(BridgeError::DuplicateCorrelation(id.to_string()));
        }
        self.entries
            .insert(id.to_string(), PendingRequest::new(completion, subscriber));
        Ok(())
    }

    /// Deliver a response. One-shot entries are removed and resolved; stream
    /// entries resolve their completion with the first response and stay.
    pub fn resolve_one(&mut self, id: &str, payload: Value) -> Delivery {
        let Some(entry) = self.entries.get_mut(id) else {
            return Delivery::Missing;
        };

        if entry.is_stream() {
            if !entry.settle(Ok(payload)) {
                tracing::debug!(id, "Stream already settled, response ignored");
            }
            return Delivery::Kept;
        }

        if let Some(mut entry) = self.entries.remove(id) {
            entry.settle(Ok(payload));
        }
        Delivery::Removed
    }

    /// Remove the entry regardless of kind and reject it.
    pub fn reject_one(&mut self, id: &str, error: BridgeError) -> Delivery {
        match self.entries.remove(id) {
            Some(mut entry) => {
                entry.settle(Err(error));
                Delivery::Removed
            }
            None => Delivery::Missing,
        }
    }

    /// Hand a value to the entry's subscriber without removing it.
    pub fn stream(&mut self, id: &str, payload: Value) -> Delivery {
        match self.entries.get_mut(id) {
            Some(PendingRequest {
                kind: EntryKind::Stream(subscriber),
                ..
            }) => {
                subscriber(payload);
                Delivery::Kept
            }
            Some(_) => {
                tracing::debug!(id, "Subscription value for one-shot entry ignored");
                Delivery::Kept
            }
            None => Delivery::Missing,
        }
    }

    /// Remove the entry without settling it. The caller decides how to settle.
    pub fn unregister(&mut self, id: &str) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    /// Reject every entry and clear the registry. Returns the rejected ids.
    pub fn reject_all<F>(&mut self, mut make_error: F) -> Vec<String>
    where
        F: FnMut() -> BridgeError,
    {
        let mut ids = Vec::with_capacity(self.entries.len());
        for (id, mut entry) in self.entries.drain() {
            entry.settle(Err(make_error()));
            ids.push(id);
        }
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_stream(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(PendingRequest::is_stream)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
