//! Whitelist storage: query id to canonical query text.

use crate::error::WhitelistError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Key-value store backing the whitelist.
///
/// Implementations must be safe to share between concurrent requests.
/// Operations are atomic per key; nothing spans several keys.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Fetch the canonical text stored under `query_id`.
    ///
    /// A missing key is `Ok(None)`, never an error.
    async fn get(&self, query_id: &str) -> Result<Option<String>, WhitelistError>;

    /// Store `query` under `query_id`, replacing any previous value.
    async fn set(&self, query_id: &str, query: &str) -> Result<(), WhitelistError>;
}

/// In-process whitelist. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn get(&self, query_id: &str) -> Result<Option<String>, WhitelistError> {
        Ok(self.entries.read().await.get(query_id).cloned())
    }

    async fn set(&self, query_id: &str, query: &str) -> Result<(), WhitelistError> {
        self.entries
            .write()
            .await
            .insert(query_id.to_string(), query.to_string());
        Ok(())
    }
}

/// Whitelist persisted as a YAML mapping of query id to canonical text.
///
/// The whole file is read on open and rewritten on every change. Writes go
/// to a sibling temporary file first and are renamed into place.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the whitelist at `path`. A missing file is an empty whitelist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WhitelistError> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Whitelist file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Loaded whitelist"
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), WhitelistError> {
        let content = serde_yaml::to_string(entries)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl WhitelistStore for FileStore {
    async fn get(&self, query_id: &str) -> Result<Option<String>, WhitelistError> {
        Ok(self.entries.read().await.get(query_id).cloned())
    }

    async fn set(&self, query_id: &str, query: &str) -> Result<(), WhitelistError> {
        // Held across the write so concurrent sets land in order.
        let mut entries = self.entries.write().await;
        if entries.get(query_id).map(String::as_str) == Some(query) {
            return Ok(());
        }

        let previous = entries.insert(query_id.to_string(), query.to_string());
        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(previous) => entries.insert(query_id.to_string(), previous),
                None => entries.remove(query_id),
            };
            return Err(WhitelistError::Store(format!(
                "failed to write {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!(query_id = %query_id, path = %self.path.display(), "Stored whitelist entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_get_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_set_and_get() {
        let store = MemoryStore::new();
        store.set("id", "{ a }").await.unwrap();
        assert_eq!(store.get("id").await.unwrap().as_deref(), Some("{ a }"));
    }

    #[tokio::test]
    async fn test_memory_store_set_is_idempotent() {
        let store = MemoryStore::new();
        store.set("id", "{ a }").await.unwrap();
        store.set("id", "{ a }").await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_concurrent_writes() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(&format!("id-{}", i), "{ a }").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len().await, 16);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("whitelist.yaml")).await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.get("id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.yaml");

        let store = FileStore::open(&path).await.unwrap();
        store.set("id", "query A {\n  a\n}\n").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.get("id").await.unwrap().as_deref(),
            Some("query A {\n  a\n}\n")
        );
    }

    #[tokio::test]
    async fn test_file_store_skips_unchanged_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.yaml");

        let store = FileStore::open(&path).await.unwrap();
        store.set("id", "{ a }").await.unwrap();
        tokio::fs::write(&path, "# untouched\n").await.unwrap();

        store.set("id", "{ a }").await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "# untouched\n");
    }

    #[tokio::test]
    async fn test_file_store_rolls_back_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        tokio::fs::create_dir(&nested).await.unwrap();
        let path = nested.join("whitelist.yaml");
        tokio::fs::write(&path, "id: \"{ a }\"\n").await.unwrap();

        let store = FileStore::open(&path).await.unwrap();
        tokio::fs::remove_dir_all(&nested).await.unwrap();

        let added = store.set("new", "{ b }").await;
        let replaced = store.set("id", "{ c }").await;

        assert!(matches!(added, Err(WhitelistError::Store(_))));
        assert!(matches!(replaced, Err(WhitelistError::Store(_))));
        assert_eq!(store.get("new").await.unwrap(), None);
        assert_eq!(store.get("id").await.unwrap().as_deref(), Some("{ a }"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_file_store_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.yaml");
        tokio::fs::write(&path, "- not\n- a mapping\n").await.unwrap();

        let result = FileStore::open(&path).await;
        assert!(matches!(result, Err(WhitelistError::Yaml(_))));
    }
}
