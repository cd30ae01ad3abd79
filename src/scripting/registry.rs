use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Callbacks registered by scripts, keyed by subscription key.
///
/// Keys are compared as plain strings. Entries are only ever appended: there
/// is no unsubscribe, so a long-running process that keeps calling `watch`
/// grows this without bound.
#[derive(Debug)]
pub struct CallbackRegistry<C> {
    callbacks: HashMap<String, Vec<C>>,
}

impl<C> CallbackRegistry<C> {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Append `callback` under `key`.
    ///
    /// Returns `true` if this is the first callback for `key`, in which case
    /// the caller is expected to open the matching subscription.
    pub fn register(&mut self, key: impl Into<String>, callback: C) -> bool {
        match self.callbacks.entry(key.into()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(callback);
                debug!(target: "scripting", "Added callback #{} for {}", entry.get().len(), entry.key());
                false
            }
            Entry::Vacant(entry) => {
                debug!(target: "scripting", "First callback for {}", entry.key());
                entry.insert(vec![callback]);
                true
            }
        }
    }

    /// Callbacks for `key` in registration order. Empty for unknown keys.
    pub fn lookup(&self, key: &str) -> &[C] {
        self.callbacks.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Total number of callbacks across all keys
    pub fn callback_count(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
