//! [`ClientStore`] implementations
//!
//! - [`JsonFileStore`] keeps the client map and cached device token in one JSON
//!   document on disk, rewritten atomically on every change.
//! - [`MemoryStore`] keeps them in memory; useful for tests and for hosts that
//!   persist elsewhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::ClientStore;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::types::DeviceToken;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    #[serde(default)]
    clients: HashMap<String, String>,
    #[serde(default)]
    cached_device_token: Option<DeviceToken>,
}

/// JSON file backed store
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serialises read-modify-write cycles on the document
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Use the document at `path`; it is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at the configured `store_path`, if one is set
    pub fn from_config(config: &BridgeConfig) -> Option<Self> {
        config.store_path.as_ref().map(Self::new)
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> BridgeResult<StoreDocument> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(StoreDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BridgeError::storage(format!("Corrupt store {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, doc: &StoreDocument) -> BridgeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Persisted client store to {}", self.path.display());
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut StoreDocument)) -> BridgeResult<()> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        apply(&mut doc);
        self.write(&doc)
    }
}

impl ClientStore for JsonFileStore {
    fn load_clients(&self) -> BridgeResult<HashMap<String, String>> {
        let _guard = self.lock.lock();
        Ok(self.read()?.clients)
    }

    fn save_clients(&self, clients: &HashMap<String, String>) -> BridgeResult<()> {
        self.update(|doc| doc.clients = clients.clone())
    }

    fn load_device_token(&self) -> BridgeResult<Option<DeviceToken>> {
        let _guard = self.lock.lock();
        Ok(self.read()?.cached_device_token)
    }

    fn save_device_token(&self, token: Option<&DeviceToken>) -> BridgeResult<()> {
        self.update(|doc| doc.cached_device_token = token.cloned())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with a client map and cached token
    pub fn with_contents(clients: HashMap<String, String>, device_token: Option<DeviceToken>) -> Self {
        Self {
            doc: Mutex::new(StoreDocument {
                clients,
                cached_device_token: device_token,
            }),
        }
    }
}

impl ClientStore for MemoryStore {
    fn load_clients(&self) -> BridgeResult<HashMap<String, String>> {
        Ok(self.doc.lock().clients.clone())
    }

    fn save_clients(&self, clients: &HashMap<String, String>) -> BridgeResult<()> {
        self.doc.lock().clients = clients.clone();
        Ok(())
    }

    fn load_device_token(&self) -> BridgeResult<Option<DeviceToken>> {
        Ok(self.doc.lock().cached_device_token.clone())
    }

    fn save_device_token(&self, token: Option<&DeviceToken>) -> BridgeResult<()> {
        self.doc.lock().cached_device_token = token.cloned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_store_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clients.json");

        let store = JsonFileStore::new(&path);
        assert!(store.load_clients().unwrap().is_empty());
        assert_eq!(store.load_device_token().unwrap(), None);

        let mut clients = HashMap::new();
        clients.insert("42".to_string(), "Bob".to_string());
        store.save_clients(&clients).unwrap();
        store.save_device_token(Some(&DeviceToken::new(vec![1, 2, 3]))).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.load_clients().unwrap().get("42").map(String::as_str), Some("Bob"));
        assert_eq!(reopened.load_device_token().unwrap(), Some(DeviceToken::new(vec![1, 2, 3])));

        reopened.save_device_token(None).unwrap();
        assert_eq!(store.load_device_token().unwrap(), None);
        // Clearing the token leaves the clients alone
        assert_eq!(store.load_clients().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_document_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileStore::new(&path).load_clients().unwrap_err();
        assert!(matches!(err, BridgeError::Storage { .. }));
    }

    #[test]
    fn test_from_config() {
        assert!(JsonFileStore::from_config(&BridgeConfig::default()).is_none());

        let config = BridgeConfig::default().with_store_path("/var/lib/callbridge/clients.json");
        let store = JsonFileStore::from_config(&config).unwrap();
        assert_eq!(store.path(), Path::new("/var/lib/callbridge/clients.json"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::with_contents(HashMap::new(), Some(DeviceToken::new(vec![9])));
        assert_eq!(store.load_device_token().unwrap(), Some(DeviceToken::new(vec![9])));
        store.save_device_token(None).unwrap();
        assert_eq!(store.load_device_token().unwrap(), None);
    }
}
