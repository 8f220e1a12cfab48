use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::VoxError;

/// A stored preference: either text or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Float(value) => value.to_string(),
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(value) => Some(*value as f32),
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

/// Flat named-value preference storage.
pub trait SettingsStore: Send + Sync {
    /// Every stored value, read in one go.
    fn snapshot(&self) -> Result<BTreeMap<String, SettingValue>, VoxError>;

    fn set_value(&self, key: &str, value: SettingValue) -> Result<(), VoxError>;

    fn get_string(&self, key: &str) -> Result<Option<String>, VoxError> {
        Ok(self.snapshot()?.get(key).map(SettingValue::as_text))
    }

    fn get_float(&self, key: &str) -> Result<Option<f32>, VoxError> {
        Ok(self.snapshot()?.get(key).and_then(SettingValue::as_float))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), VoxError> {
        self.set_value(key, SettingValue::Text(value.to_string()))
    }

    fn set_float(&self, key: &str, value: f32) -> Result<(), VoxError> {
        self.set_value(key, SettingValue::Float(f64::from(value)))
    }
}

/// In-memory store, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, SettingValue>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn snapshot(&self) -> Result<BTreeMap<String, SettingValue>, VoxError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn set_value(&self, key: &str, value: SettingValue) -> Result<(), VoxError> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// TOML-file-backed store (`settings.toml`).
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, SettingValue>, VoxError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn snapshot(&self) -> Result<BTreeMap<String, SettingValue>, VoxError> {
        self.read()
    }

    fn set_value(&self, key: &str, value: SettingValue) -> Result<(), VoxError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut values = self.read()?;
        values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string(&values)?)?;
        #[cfg(unix)]
        {
            // API keys live in this file.
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileSettingsStore) {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        (dir, store)
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let (_dir, store) = temp_store();
        assert!(store.snapshot().unwrap().is_empty());
        assert_eq!(store.get_string("tts_voice").unwrap(), None);
    }

    #[test]
    fn values_persist_across_instances() {
        let (dir, store) = temp_store();
        store.set_string("tts_voice", "tr").unwrap();
        store.set_float("tts_rate", 1.25).unwrap();

        let reopened = FileSettingsStore::new(dir.path().join("settings.toml"));
        assert_eq!(reopened.get_string("tts_voice").unwrap().as_deref(), Some("tr"));
        assert_eq!(reopened.get_float("tts_rate").unwrap(), Some(1.25));
    }

    #[test]
    fn writes_only_touch_their_own_key() {
        let (_dir, store) = temp_store();
        store.set_string("a", "one").unwrap();
        store.set_string("b", "two").unwrap();
        store.set_string("a", "three").unwrap();

        let values = store.snapshot().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], SettingValue::Text("three".to_string()));
    }

    #[test]
    fn integer_literals_read_as_floats() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "tts_pitch = 2\n").unwrap();
        assert_eq!(store.get_float("tts_pitch").unwrap(), Some(2.0));
    }

    #[test]
    fn numeric_text_can_be_read_as_float() {
        let store = MemorySettingsStore::new();
        store.set_string("tts_rate", "0.75").unwrap();
        assert_eq!(store.get_float("tts_rate").unwrap(), Some(0.75));
    }
}
