//! File-backed preference store.
//!
//! Values live in one small JSON object, rewritten on every put. Another
//! process (a widget, or `envsense last`) can read the file at any time.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use envsense_core::{PreferenceError, PreferenceStore};

/// JSON file preference store.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FilePreferences {
    /// Store backed by `path`. The file is created on the first put.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, f32>, PreferenceError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| PreferenceError::Encoding(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PreferenceStore for FilePreferences {
    fn put_f32(&self, key: &str, value: f32) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read()?;
        values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&values)
            .map_err(|e| PreferenceError::Encoding(e.to_string()))?;
        fs::write(&self.path, content)?;
        tracing::trace!(key, value, path = %self.path.display(), "Preference saved");
        Ok(())
    }

    fn get_f32(&self, key: &str) -> Result<Option<f32>, PreferenceError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsense_core::TEMPERATURE_PREFERENCE;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let store = FilePreferences::new(dir.path().join("preferences.json"));
        assert_eq!(store.get_f32(TEMPERATURE_PREFERENCE).unwrap(), None);
    }

    #[test]
    fn test_put_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("preferences.json");

        let store = FilePreferences::new(&path);
        store.put_f32(TEMPERATURE_PREFERENCE, 21.5).unwrap();
        store.put_f32("other", 1.0).unwrap();
        store.put_f32(TEMPERATURE_PREFERENCE, 22.25).unwrap();

        let reopened = FilePreferences::new(&path);
        assert_eq!(reopened.get_f32(TEMPERATURE_PREFERENCE).unwrap(), Some(22.25));
        assert_eq!(reopened.get_f32("other").unwrap(), Some(1.0));
    }

    #[test]
    fn test_corrupt_file_is_an_encoding_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "not json").unwrap();

        let store = FilePreferences::new(&path);
        assert!(matches!(
            store.get_f32(TEMPERATURE_PREFERENCE),
            Err(PreferenceError::Encoding(_))
        ));
    }
}
