//! Persistent printer info.
//!
//! Credentials issued by the remote service (token, printer id), the
//! printer name and the last inferred ambient temperature survive restarts
//! in a small JSON file.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

pub const KEY_PRINTER_TOKEN: &str = "printer_token";
pub const KEY_PRINTER_ID: &str = "printer_id";
pub const KEY_PRINTER_NAME: &str = "printer_name";
pub const KEY_AMBIENT_TEMP: &str = "ambient_temp";

/// File name of the store inside the data directory.
pub const STORE_FILE_NAME: &str = "printlink.json";

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value store cached in memory and mirrored to a JSON file on every
/// change.
pub struct InfoStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl InfoStore {
    /// Opens the store, loading existing values from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let values = load_values(&path)?;
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Opens `printlink.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::new(dir.join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Stores a value and persists the whole map.
    ///
    /// The in-memory value is updated even when writing the file fails.
    pub fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), value);
        self.persist()
    }

    pub fn printer_token(&self) -> Option<String> {
        self.get_string(KEY_PRINTER_TOKEN)
    }

    /// Printer id. Older files may hold it as a number.
    pub fn printer_id(&self) -> Option<String> {
        match self.get(KEY_PRINTER_ID)? {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn printer_name(&self) -> Option<String> {
        self.get_string(KEY_PRINTER_NAME)
    }

    pub fn ambient_temp(&self) -> Option<i64> {
        self.get(KEY_AMBIENT_TEMP)?.as_i64()
    }

    pub fn set_printer_token(&self, token: &str) -> Result<(), StoreError> {
        self.set(KEY_PRINTER_TOKEN, Value::from(token))
    }

    pub fn set_printer_id(&self, id: &str) -> Result<(), StoreError> {
        self.set(KEY_PRINTER_ID, Value::from(id))
    }

    pub fn set_printer_name(&self, name: &str) -> Result<(), StoreError> {
        self.set(KEY_PRINTER_NAME, Value::from(name))
    }

    pub fn set_ambient_temp(&self, ambient: i64) -> Result<(), StoreError> {
        self.set(KEY_AMBIENT_TEMP, Value::from(ambient))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let json = {
            let map = self.values.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_string_pretty(&*map)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted printer info to {:?}", self.path);
        Ok(())
    }
}

fn load_values(path: &Path) -> Result<Map<String, Value>, StoreError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let data = std::fs::read_to_string(path)?;
    let values: Map<String, Value> = serde_json::from_str(&data)?;
    debug!("loaded {} printer info value(s) from {:?}", values.len(), path);
    Ok(values)
}

/// Returns the default data directory (`<config dir>/printlink`).
pub fn default_data_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("printlink"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
