//! # Session
//!
//! The participant identity and local key-value store for one run of the
//! application. A [`Session`] is built once at startup and passed to whatever
//! needs it; nothing here lives in module-level state.

use crate::error::{GemError, GemResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Key under which the participant identifier is persisted.
pub const PARTICIPANT_KEY: &str = "participant_id";

/// Persisted string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> GemResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> GemResult<()>;
}

/// Store that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> GemResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> GemResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// The whole map is cached in memory and rewritten on each `set` through a
/// temporary file followed by a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing or unreadable file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> GemResult<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                info!("Ignoring corrupt store {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(GemError::Store(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        debug!("Opened store {} with {} keys", path.display(), entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> GemResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GemError::Store(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| GemError::Store(format!("Failed to write {}: {}", temp_path.display(), e)))?;

        // Atomic rename
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| GemError::Store(format!("Failed to replace {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> GemResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> GemResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }
}

/// One application session: who the participant is and where local data lives.
#[derive(Clone)]
pub struct Session {
    participant_id: String,
    store: Arc<dyn KeyValueStore>,
}

impl Session {
    /// Restores the persisted participant id, minting and storing a new one on
    /// first run.
    pub async fn establish(store: Arc<dyn KeyValueStore>) -> GemResult<Self> {
        let participant_id = match store.get(PARTICIPANT_KEY).await? {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                store.set(PARTICIPANT_KEY, &id).await?;
                info!("🆕 New participant {}", id);
                id
            }
        };

        Ok(Self {
            participant_id,
            store,
        })
    }

    /// Uses an explicit participant id and persists it for later sessions.
    pub async fn with_participant(
        participant_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> GemResult<Self> {
        let participant_id = participant_id.into();
        store.set(PARTICIPANT_KEY, &participant_id).await?;
        Ok(Self {
            participant_id,
            store,
        })
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("participant_id", &self.participant_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_establish_reuses_persisted_participant() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = Session::establish(store.clone()).await.unwrap();
        let second = Session::establish(store.clone()).await.unwrap();

        assert_eq!(first.participant_id(), second.participant_id());
        assert!(Uuid::parse_str(first.participant_id()).is_ok());
    }

    #[tokio::test]
    async fn test_with_participant_overrides_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Session::with_participant("ada", store.clone()).await.unwrap();

        let restored = Session::establish(store).await.unwrap();
        assert_eq!(restored.participant_id(), "ada");
    }

    #[tokio::test]
    async fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.set("color", "teal").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("color").await.unwrap().as_deref(), Some("teal"));
        assert_eq!(reopened.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_store_ignores_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(store.get(PARTICIPANT_KEY).await.unwrap(), None);
    }
}
