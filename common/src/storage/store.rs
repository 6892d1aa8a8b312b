use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Blob Store for uploaded documents and extracted images.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new StorageManager with the backend selected in the configuration.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager around an already constructed backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve the full contents buffered in memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Delete a single object. Missing objects are not an error.
    pub async fn delete(&self, location: &str) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Delete all objects below the specified prefix.
    ///
    /// For local filesystem backends, this also attempts to clean up empty directories.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await;
        }

        Ok(())
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Best-effort removal of the now empty directories left behind by `delete_prefix`.
    async fn cleanup_filesystem_directories(&self, prefix: &str) {
        let Some(base) = &self.local_base else {
            return;
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return;
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl StorageManager {
    /// In-memory Blob Store for tests.
    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(root: &Path) -> AppConfig {
        AppConfig {
            data_dir: root.to_string_lossy().into_owned(),
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_round_trips_bytes() {
        let storage = StorageManager::memory();
        let location = "user-1/collection-1/1700000000000-notes.txt";

        storage
            .put(location, Bytes::from_static(b"hello blob store"))
            .await
            .expect("put");

        let fetched = storage.get(location).await.expect("get");
        assert_eq!(fetched.as_ref(), b"hello blob store");
        assert!(storage.exists(location).await.expect("exists"));

        storage.delete(location).await.expect("delete");
        assert!(!storage.exists(location).await.expect("exists after delete"));

        storage
            .delete(location)
            .await
            .expect("deleting a missing object is not an error");
    }

    #[tokio::test]
    async fn delete_prefix_removes_document_images_only() {
        let storage = StorageManager::memory();
        for index in 0..3 {
            storage
                .put(
                    &format!("images/user-1/doc-1/image_{index}.png"),
                    Bytes::from_static(b"png"),
                )
                .await
                .expect("put image");
        }
        storage
            .put("images/user-1/doc-2/image_0.png", Bytes::from_static(b"png"))
            .await
            .expect("put other image");

        storage
            .delete_prefix("images/user-1/doc-1")
            .await
            .expect("delete prefix");

        assert!(!storage
            .exists("images/user-1/doc-1/image_0.png")
            .await
            .expect("exists"));
        assert!(storage
            .exists("images/user-1/doc-2/image_0.png")
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn local_backend_reads_back_and_cleans_up_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = StorageManager::new(&local_config(temp.path()))
            .await
            .expect("local storage");

        storage
            .put("images/u/d/image_0.png", Bytes::from_static(b"abc"))
            .await
            .expect("put");

        let data = storage.get("images/u/d/image_0.png").await.expect("get");
        assert_eq!(&data[..], b"abc");

        storage.delete_prefix("images/u/d").await.expect("delete");
        assert!(!temp.path().join("images/u/d").exists());
    }
}
