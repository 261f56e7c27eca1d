//! Client directory: transport client ids mapped to display names
//!
//! The directory is loaded from the [`ClientStore`] when the bridge starts and
//! written back on every change. A reserved [`DEFAULT_CALLER_KEY`] entry holds
//! the host-chosen fallback name; when it is absent the configured default
//! caller is used.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::capabilities::ClientStore;
use crate::error::BridgeResult;

/// Reserved directory key holding the fallback caller name
pub const DEFAULT_CALLER_KEY: &str = "defaultCaller";

/// Persistent id → display name mapping
pub struct ClientDirectory {
    entries: HashMap<String, String>,
    fallback: String,
    store: Arc<dyn ClientStore>,
}

impl std::fmt::Debug for ClientDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDirectory")
            .field("entries", &self.entries)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl ClientDirectory {
    /// Load the directory from `store`, using `fallback` as the last-resort name
    pub fn load(store: Arc<dyn ClientStore>, fallback: impl Into<String>) -> BridgeResult<Self> {
        let entries = store.load_clients()?;
        debug!("Loaded {} client directory entries", entries.len());
        Ok(Self {
            entries,
            fallback: fallback.into(),
            store,
        })
    }

    /// Name registered for exactly `id`
    pub fn lookup(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    /// Current fallback caller name
    pub fn default_caller(&self) -> &str {
        self.lookup(DEFAULT_CALLER_KEY).unwrap_or(self.fallback.as_str())
    }

    /// Display name for `id`, falling back to the default caller
    pub fn display_name(&self, id: &str) -> &str {
        self.lookup(id).unwrap_or_else(|| self.default_caller())
    }

    /// Display name for an incoming call: an explicit caller id wins over the directory
    pub fn resolve_caller_name<'a>(&'a self, handle: &str, caller_id: Option<&'a str>) -> &'a str {
        match caller_id {
            Some(name) if !name.is_empty() => name,
            _ => self.display_name(handle),
        }
    }

    /// Map `id` to `name`; only persists when the entry actually changes
    pub fn register_client(&mut self, id: &str, name: &str) -> BridgeResult<()> {
        if self.lookup(id) == Some(name) {
            return Ok(());
        }
        self.entries.insert(id.to_string(), name.to_string());
        self.persist()
    }

    /// Forget `id`
    pub fn unregister_client(&mut self, id: &str) -> BridgeResult<()> {
        self.entries.remove(id);
        self.persist()
    }

    /// Replace the fallback caller name
    pub fn set_default_caller(&mut self, name: &str) -> BridgeResult<()> {
        self.fallback = name.to_string();
        self.register_client(DEFAULT_CALLER_KEY, name)
    }

    /// Number of entries, including the default caller entry
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn persist(&self) -> BridgeResult<()> {
        self.store.save_clients(&self.entries)
    }
}
