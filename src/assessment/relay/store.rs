use super::RelayError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable string key-value storage mirroring browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), RelayError>;
    fn get_item(&self, key: &str) -> Result<Option<String>, RelayError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryStore {
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), RelayError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| RelayError::Store("in-memory store poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, RelayError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| RelayError::Store("in-memory store poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }
}

/// Stores all keys in one JSON object file, rewritten on every write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, RelayError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(store_error)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(store_error)
    }
}

fn store_error<E: std::fmt::Display>(err: E) -> RelayError {
    RelayError::Store(err.to_string())
}

impl KeyValueStore for JsonFileStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), RelayError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| RelayError::Store("file store lock poisoned".to_string()))?;
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(store_error)?;
        }
        let encoded = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, encoded).map_err(store_error)
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, RelayError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| RelayError::Store("file store lock poisoned".to_string()))?;
        Ok(self.read_entries()?.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("paps-store-{}-{name}", std::process::id()))
            .join("results.json")
    }

    #[test]
    fn in_memory_store_overwrites_keys() {
        let store = InMemoryStore::default();
        store.set_item("results", "{}").expect("write");
        store.set_item("results", "{\"a\":1}").expect("overwrite");

        assert_eq!(
            store.get_item("results").expect("read"),
            Some("{\"a\":1}".to_string())
        );
        assert_eq!(store.get_item("timestamp").expect("read"), None);
    }

    #[test]
    fn json_file_store_persists_across_instances() {
        let path = scratch_path("persist");
        let _ = fs::remove_file(&path);

        JsonFileStore::new(&path)
            .set_item("timestamp", "1700000000000")
            .expect("write");
        let reopened = JsonFileStore::new(&path);
        reopened.set_item("results", "{}").expect("second write");

        assert_eq!(
            reopened.get_item("timestamp").expect("read"),
            Some("1700000000000".to_string())
        );
        assert_eq!(reopened.get_item("results").expect("read"), Some("{}".to_string()));

        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn json_file_store_reports_corrupt_file() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, "not json").expect("seed");

        let error = JsonFileStore::new(&path)
            .set_item("results", "{}")
            .expect_err("corrupt file rejected");
        assert!(matches!(error, RelayError::Store(_)));

        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }
}
