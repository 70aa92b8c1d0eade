//! Persisted login session
//!
//! The logged-in user is kept as one serialized record under the `user`
//! key of a small key-value store, so a restart can pick the session back
//! up without logging in again.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::api::types::User;

/// Key the user record is stored under.
pub const USER_KEY: &str = "user";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to access session store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode session: {0}")]
    Json(#[from] serde_json::Error),
}

/// String values under string keys, persisted somewhere local.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// A JSON object on disk, rewritten through a temp file on every change.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The stored object. A file that no longer parses reads as empty and
    /// is flagged so the next write replaces it.
    fn read_map(&self) -> Result<(Map<String, Value>, bool), SessionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Map::new(), false)),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok((Map::new(), false));
        }
        match serde_json::from_str(&content) {
            Ok(map) => Ok((map, false)),
            Err(e) => {
                log::warn!("Session file {:?} is unreadable, starting empty: {}", self.path, e);
                Ok((Map::new(), true))
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Unique temp name so two writers never share a file
        let tmp = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T>(&self, f: impl FnOnce(&Map<String, Value>) -> T) -> Result<T, SessionError> {
        let _guard = self.lock();
        let (map, _) = self.read_map()?;
        Ok(f(&map))
    }

    /// Apply `f` and write back if it changed anything or the file had to
    /// be discarded.
    fn update(&self, f: impl FnOnce(&mut Map<String, Value>) -> bool) -> Result<(), SessionError> {
        let _guard = self.lock();
        let (mut map, discarded) = self.read_map()?;
        if f(&mut map) || discarded {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.read(|map| map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.update(|map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.update(|map| map.remove(key).is_some())
    }
}

/// In-memory store, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.values().remove(key);
        Ok(())
    }
}

pub struct SessionStore {
    store: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn save(&self, user: &User) -> Result<(), SessionError> {
        let blob = serde_json::to_string(user)?;
        self.store.set(USER_KEY, &blob)?;
        log::info!("Saved session for user {}", user.id);
        Ok(())
    }

    /// The saved user, or `None` when nobody is logged in.
    ///
    /// A record that no longer parses is discarded and treated as absent.
    pub fn restore(&self) -> Result<Option<User>, SessionError> {
        let Some(blob) = self.store.get(USER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<User>(&blob) {
            Ok(user) => {
                log::info!("Restored session for user {}", user.id);
                Ok(Some(user))
            }
            Err(e) => {
                log::warn!("Discarding unreadable session: {}", e);
                self.store.remove(USER_KEY)?;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        self.store.remove(USER_KEY)?;
        log::info!("Cleared session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> User {
        let mut user = User::new(7, Some("alice"), "alice@example.com");
        user.profile.insert("tracks_created".to_string(), json!(3));
        user
    }

    #[test]
    fn save_then_restore_keeps_profile_fields() {
        let session = SessionStore::in_memory();
        session.save(&alice()).unwrap();
        assert_eq!(session.restore().unwrap(), Some(alice()));
    }

    #[test]
    fn restore_without_session_is_absent() {
        let session = SessionStore::in_memory();
        assert_eq!(session.restore().unwrap(), None);
    }

    #[test]
    fn clear_is_idempotent() {
        let session = SessionStore::in_memory();
        session.clear().unwrap();
        session.save(&alice()).unwrap();
        session.clear().unwrap();
        session.clear().unwrap();
        assert_eq!(session.restore().unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("session.json");

        SessionStore::new(JsonFileStore::new(&path)).save(&alice()).unwrap();
        assert!(path.exists());
        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let reopened = SessionStore::new(JsonFileStore::new(&path));
        assert_eq!(reopened.restore().unwrap(), Some(alice()));
    }

    #[test]
    fn file_store_keeps_other_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("session.json"));
        store.set("theme", "dark").unwrap();
        store.set(USER_KEY, "{}").unwrap();
        store.remove(USER_KEY).unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn corrupted_record_is_dropped() {
        let store = MemoryStore::new();
        store.set(USER_KEY, "{not json").unwrap();
        let session = SessionStore::new(store);
        assert_eq!(session.restore().unwrap(), None);
        assert_eq!(session.restore().unwrap(), None);
    }

    #[test]
    fn truncated_file_is_recovered() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, r#"{"user": "{\"id\":1"#).unwrap();
        let session = SessionStore::new(JsonFileStore::new(&path));

        assert_eq!(session.restore().unwrap(), None);
        session.clear().unwrap();
        // clearing rewrote the file as an empty object
        let rewritten: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten, json!({}));

        session.save(&alice()).unwrap();
        assert_eq!(session.restore().unwrap(), Some(alice()));
    }

    #[test]
    fn save_over_garbage_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, "[1, 2").unwrap();

        let session = SessionStore::new(JsonFileStore::new(&path));
        session.save(&alice()).unwrap();
        let reopened = SessionStore::new(JsonFileStore::new(&path));
        assert_eq!(reopened.restore().unwrap(), Some(alice()));
    }
}
