//! Durable document storage consumed by the persistence adapter.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

use crate::buffer::lock::mutex_lock;

const SOURCE: &str = "infra::storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid document path `{0}`")]
    InvalidPath(String),
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Minimal path-addressed document store.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Read a document; missing documents are [`StorageError::NotFound`].
    async fn read(&self, path: &str) -> Result<String, StorageError>;

    /// Create or overwrite a document.
    async fn write(&self, path: &str, content: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed storage rooted at a directory.
#[derive(Debug)]
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let absolute = self.resolve(path)?;
        Ok(fs::try_exists(absolute).await?)
    }

    async fn read(&self, path: &str) -> Result<String, StorageError> {
        let absolute = self.resolve(path)?;
        match fs::read_to_string(&absolute).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers only ever observe a complete document.
        let staging = absolute.with_extension("tmp");
        let mut file = fs::File::create(&staging).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&staging, &absolute).await?;
        Ok(())
    }
}

/// In-process storage for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryDocumentStorage {
    documents: Mutex<HashMap<String, String>>,
}

impl MemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every stored document, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.documents().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Overwrite a document directly, bypassing the trait.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.documents().insert(path.into(), content.into());
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, String>> {
        mutex_lock(&self.documents, SOURCE, "documents")
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.documents().contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<String, StorageError> {
        self.documents()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        self.documents()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }
}
