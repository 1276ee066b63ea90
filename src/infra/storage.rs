//! Blob storage backends keyed by hierarchical `/`-separated paths.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::lock::{rw_read, rw_write};
use crate::config::{StorageBackend, StorageSettings};

const SOURCE: &str = "infra::storage";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid blob path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Durable key/value storage for cache blobs.
///
/// Writes replace the whole blob; readers never observe a partial write.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// `Ok(None)` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Bytes>, StorageError>;

    async fn write(&self, path: &str, content: Bytes) -> Result<(), StorageError>;

    /// Missing blobs are treated as success.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Every stored path starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn backend(&self) -> &'static str;
}

/// Pick the configured backend once at startup.
pub fn build_blob_store(settings: &StorageSettings) -> Result<Arc<dyn BlobStore>, StorageError> {
    match settings.backend {
        StorageBackend::Local => {
            info!(root = %settings.root.display(), "Using local blob storage");
            Ok(Arc::new(LocalBlobStore::new(settings.root.clone())?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory blob storage");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
    }
}

/// Filesystem-backed blob storage rooted at a directory.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Initialise storage rooted at `root`, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, blob_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(blob_path);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        });
        if blob_path.is_empty() || relative.is_absolute() || escapes {
            return Err(StorageError::InvalidPath(blob_path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let absolute = self.resolve(path)?;
        Ok(fs::try_exists(absolute).await?)
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        let absolute = self.resolve(path)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn write(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        let parent = absolute
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(parent).await?;

        // Stage next to the target so the rename stays on one filesystem.
        let staging = parent.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        let written = async {
            file.write_all(&content).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(err));
        }

        debug!(path, bytes = content.len(), "Saved blob");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => {
                debug!(path, "Deleted blob");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Walk the deepest directory the prefix fully names, then filter by string prefix.
        let directory = match prefix.rfind('/') {
            Some(index) => &prefix[..index],
            None => "",
        };
        let start = if directory.is_empty() {
            self.root.clone()
        } else {
            self.resolve(directory)?
        };
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || walk(&root, &start, &prefix))
            .await
            .map_err(|err| StorageError::Task(err.to_string()))?
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

fn walk(root: &Path, start: &Path, prefix: &str) -> Result<Vec<String>, StorageError> {
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(start).follow_links(false) {
        let entry = entry.map_err(|err| StorageError::Io(std::io::Error::other(err)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(TEMP_PREFIX))
        {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            paths.push(key);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Process-local blob storage, used for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.blobs, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(rw_read(&self.blobs, SOURCE, "exists").contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(rw_read(&self.blobs, SOURCE, "read").get(path).cloned())
    }

    async fn write(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        rw_write(&self.blobs, SOURCE, "write").insert(path.to_string(), content);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        rw_write(&self.blobs, SOURCE, "delete").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let blobs = rw_read(&self.blobs, SOURCE, "list");
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
