//! Saved connection strings.
//!
//! The store is a plain ordered list of strings. The file-backed store
//! keeps it as a JSON array and rewrites the file atomically on change.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use common::config::StoreLocation;
use common::errors::{AppError, AppResult};

/// Persistence for saved connection strings.
///
/// `list_all` right after `append` must include the appended entry.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// All saved entries in insertion order.
    async fn list_all(&self) -> AppResult<Vec<String>>;

    async fn append(&self, connection_string: &str) -> AppResult<()>;

    /// Removes the first equal entry; absent entries are ignored.
    async fn remove(&self, connection_string: &str) -> AppResult<()>;
}

/// Opens the store configured for this process.
pub fn open_store(location: &StoreLocation) -> Arc<dyn ConnectionStore> {
    match location {
        StoreLocation::Memory => Arc::new(MemoryConnectionStore::default()),
        StoreLocation::File(path) => Arc::new(FileConnectionStore::new(path.clone())),
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    entries: Mutex<Vec<String>>,
}

impl MemoryConnectionStore {
    pub fn with_entries(entries: Vec<String>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn list_all(&self) -> AppResult<Vec<String>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn append(&self, connection_string: &str) -> AppResult<()> {
        self.entries.lock().await.push(connection_string.to_string());
        Ok(())
    }

    async fn remove(&self, connection_string: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(index) = entries.iter().position(|e| e == connection_string) {
            entries.remove(index);
        }
        Ok(())
    }
}

/// JSON file store.
#[derive(Debug)]
pub struct FileConnectionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileConnectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> AppResult<Vec<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Store(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| AppError::Store(format!("failed to parse {}: {e}", self.path.display())))
    }

    async fn write(&self, entries: Vec<String>) -> AppResult<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &entries))
            .await
            .map_err(|e| AppError::Internal(format!("store writer panicked: {e}")))?
    }

    async fn modify<F>(&self, change: F) -> AppResult<()>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        if change(&mut entries) {
            self.write(entries).await?;
        }
        Ok(())
    }
}

/// Writes through a temp file in the same directory, then renames it over
/// the target.
fn write_atomically(path: &Path, entries: &[String]) -> AppResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| AppError::Store(format!("failed to create {}: {e}", parent.display())))?;

    let content = serde_json::to_string_pretty(entries)
        .map_err(|e| AppError::Store(format!("failed to serialize connections: {e}")))?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| AppError::Store(format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

#[async_trait]
impl ConnectionStore for FileConnectionStore {
    async fn list_all(&self) -> AppResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn append(&self, connection_string: &str) -> AppResult<()> {
        self.modify(|entries| {
            entries.push(connection_string.to_string());
            true
        })
        .await?;
        tracing::debug!(path = %self.path.display(), "store file written");
        Ok(())
    }

    async fn remove(&self, connection_string: &str) -> AppResult<()> {
        self.modify(|entries| match entries.iter().position(|e| e == connection_string) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        })
        .await?;
        tracing::debug!(path = %self.path.display(), "store file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const A: &str = "AccountEndpoint=https://a.documents.azure.com:443/;AccountKey=a==";
    const B: &str = "AccountEndpoint=https://b.documents.azure.com:443/;AccountKey=b==";

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileConnectionStore::new(dir.path().join("connections.json"));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_remove_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("connections.json");

        let store = FileConnectionStore::new(&path);
        store.append(A).await.unwrap();
        store.append(B).await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![A, B]);

        // A fresh instance sees what the previous one wrote.
        let reopened = FileConnectionStore::new(&path);
        assert_eq!(reopened.list_all().await.unwrap(), vec![A, B]);

        reopened.remove(A).await.unwrap();
        reopened.remove("not saved").await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![B]);

        let on_disk: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec![B]);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_store_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("connections.json");
        std::fs::write(&path, "not json {{").unwrap();

        let store = FileConnectionStore::new(&path);
        assert!(matches!(store.list_all().await, Err(AppError::Store(_))));
        assert!(matches!(store.append(A).await, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn test_memory_store_removes_first_match() {
        let store = MemoryConnectionStore::with_entries(vec![A.into(), B.into(), A.into()]);
        store.remove(A).await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![B, A]);
    }

    #[tokio::test]
    async fn test_open_store_memory() {
        let store = open_store(&StoreLocation::Memory);
        store.append(A).await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![A]);
    }
}
