//! Persisted map state.
//!
//! Two values survive outside the viewer: the selected dataset (local
//! storage, kept across sessions) and the explicit map setup flag (session
//! storage). Both go through [`KeyValueStore`] so the same logic runs over
//! Web Storage in the browser and a JSON file or memory on native.

use std::collections::HashMap;

use crate::constants::{DATASET_STORAGE_KEY, MAP_SETUP_STORAGE_KEY};

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store: {0}")]
    Parse(#[from] serde_json::Error),

    /// Web Storage missing or denied
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// String key/value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Store that lives as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every change.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug)]
pub struct FileStore {
    path: std::path::PathBuf,
    entries: std::collections::BTreeMap<String, String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileStore {
    /// Open a store, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            std::collections::BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// `<data_dir>/tilescope/map-state.json`
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::data_dir().map(|dir| dir.join("tilescope").join("map-state.json"))
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// `localStorage` or `sessionStorage` of the current window.
#[cfg(target_arch = "wasm32")]
pub struct WebStorage {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl WebStorage {
    pub fn local() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("No window object available".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(format!("localStorage access error: {:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage not available".to_string()))?;
        Ok(Self { storage })
    }

    pub fn session() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("No window object available".to_string()))?;
        let storage = window
            .session_storage()
            .map_err(|e| {
                StorageError::Unavailable(format!("sessionStorage access error: {:?}", e))
            })?
            .ok_or_else(|| StorageError::Unavailable("sessionStorage not available".to_string()))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for WebStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage
            .set_item(key, value)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }
}

/// Dataset choice and map setup flag.
pub struct MapPreferences {
    local: Box<dyn KeyValueStore>,
    session: Box<dyn KeyValueStore>,
}

impl MapPreferences {
    pub fn new(local: Box<dyn KeyValueStore>, session: Box<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    /// Preferences that vanish with the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))
    }

    /// Browser local and session storage.
    #[cfg(target_arch = "wasm32")]
    pub fn browser() -> Result<Self, StorageError> {
        Ok(Self::new(
            Box::new(WebStorage::local()?),
            Box::new(WebStorage::session()?),
        ))
    }

    /// Dataset remembered from an earlier session.
    ///
    /// Storage failures are logged and read as "no dataset".
    pub fn selected_dataset(&self) -> Option<String> {
        match self.local.get(DATASET_STORAGE_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                log::warn!("Cannot read {}: {}", DATASET_STORAGE_KEY, e);
                None
            }
        }
    }

    pub fn set_selected_dataset(&mut self, dataset_id: Option<&str>) -> Result<(), StorageError> {
        match dataset_id {
            Some(id) => self.local.set(DATASET_STORAGE_KEY, id),
            None => self.local.remove(DATASET_STORAGE_KEY),
        }
    }

    /// Whether the user set the map up in this session.
    pub fn is_setup_explicit(&self) -> bool {
        match self.session.get(MAP_SETUP_STORAGE_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                log::warn!("Cannot read {}: {}", MAP_SETUP_STORAGE_KEY, e);
                false
            }
        }
    }

    pub fn set_setup_explicit(&mut self, explicit: bool) -> Result<(), StorageError> {
        if explicit {
            self.session.set(MAP_SETUP_STORAGE_KEY, "true")
        } else {
            self.session.remove(MAP_SETUP_STORAGE_KEY)
        }
    }

    /// Load the map view without user action only after an explicit setup
    /// in this session and with a remembered dataset.
    pub fn should_auto_load(&self) -> bool {
        self.is_setup_explicit() && self.selected_dataset().is_some()
    }
}
