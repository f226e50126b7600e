//! Storage backends for dehydrated snapshots (§4.10, §6.1 "ambient
//! diagnostics"). Generalized from the teacher's `persistence::StorageBackend`:
//! the browser `localStorage` backend has no analogue outside a view-framework
//! binding and is dropped (§4.10); `FileBackend` takes its place as the
//! native persistence story, gated behind the `persistence` feature.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::QueryError;

/// Byte-oriented key/value storage a [`crate::hydrate::DehydratedState`]
/// snapshot can be written to and read back from.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn store(&self, key: &str, data: &[u8]) -> Result<(), QueryError>;
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, QueryError>;
    async fn remove(&self, key: &str) -> Result<(), QueryError>;
    async fn list_keys(&self) -> Result<Vec<String>, QueryError>;
    async fn clear(&self) -> Result<(), QueryError>;
}

/// In-memory backend; the default for tests and for hosts with nothing
/// durable to write to.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn store(&self, key: &str, data: &[u8]) -> Result<(), QueryError> {
        self.data.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, QueryError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), QueryError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, QueryError> {
        Ok(self.data.read().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), QueryError> {
        self.data.write().clear();
        Ok(())
    }
}

/// JSON-lines-directory backend: one file per key under `root`, native-only.
#[cfg(feature = "persistence")]
pub struct FileBackend {
    root: PathBuf,
}

#[cfg(feature = "persistence")]
impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { root: root.into() })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(key)))
    }
}

#[cfg(feature = "persistence")]
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(feature = "persistence")]
#[async_trait]
impl StorageBackend for FileBackend {
    async fn store(&self, key: &str, data: &[u8]) -> Result<(), QueryError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| QueryError::custom(format!("create persistence dir: {e}")))?;
        tokio::fs::write(self.path_for(key), data)
            .await
            .map_err(|e| QueryError::custom(format!("write snapshot {key}: {e}")))
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, QueryError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QueryError::custom(format!("read snapshot {key}: {e}"))),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), QueryError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, QueryError> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(QueryError::custom(format!("list snapshots: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QueryError::custom(format!("list snapshots: {e}")))?
        {
            if let Some(stem) = Path::new(&entry.file_name()).file_stem() {
                keys.push(stem.to_string_lossy().into_owned());
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), QueryError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_round_trips() {
        let backend = MemoryBackend::new();
        backend.store("a", b"hello").await.unwrap();
        assert_eq!(backend.retrieve("a").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(backend.list_keys().await.unwrap(), vec!["a".to_string()]);
        backend.remove("a").await.unwrap();
        assert_eq!(backend.retrieve("a").await.unwrap(), None);
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn file_backend_round_trips() {
        let dir = std::env::temp_dir().join(format!("query-cache-test-{}", std::process::id()));
        let backend = FileBackend::new(dir.clone());
        backend.store("users/1", b"{}").await.unwrap();
        assert_eq!(backend.retrieve("users/1").await.unwrap(), Some(b"{}".to_vec()));
        backend.clear().await.unwrap();
        assert_eq!(backend.retrieve("users/1").await.unwrap(), None);
    }
}
