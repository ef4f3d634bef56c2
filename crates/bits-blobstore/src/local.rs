//! Local filesystem backend
//!
//! Each key maps to a file under the root directory. Writes land in the
//! reserved `.bits-tmp` directory first and are renamed into place, so a
//! failed write never leaves a partial blob behind. Keys whose first segment
//! is `.bits-tmp` are rejected. Empty parent directories are pruned after
//! deletes.

use crate::key::validate_key;
use crate::{Backend, BlobstoreError, ListPage, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory under the root holding in-flight writes
const TEMP_DIR: &str = ".bits-tmp";

/// Filesystem backend rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl LocalBackend {
    /// Open (creating if needed) a backend rooted at `root`
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let temp_dir = root.join(TEMP_DIR);
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| BlobstoreError::from_io(e, &root.display().to_string()))?;
        debug!(root = %root.display(), "Opened local blobstore");
        Ok(Self { root, temp_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        if key.split('/').next() == Some(TEMP_DIR) {
            return Err(BlobstoreError::InvalidKey {
                key: key.to_string(),
                reason: "key is inside the reserved .bits-tmp directory",
            });
        }
        Ok(self.root.join(key))
    }

    /// A fresh temp file path, recreating the temp directory if it vanished
    async fn temp_path(&self, key: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| BlobstoreError::from_io(e, key))?;
        Ok(self.temp_dir.join(Uuid::new_v4().simple().to_string()))
    }

    async fn ensure_parent(&self, path: &Path, key: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobstoreError::from_io(e, key))?;
        }
        Ok(())
    }

    /// Move a fully written temp file over `path`, removing it on failure
    async fn commit(&self, temp: &Path, path: &Path, key: &str) -> Result<()> {
        let mut renamed = fs::rename(temp, path).await;
        if matches!(&renamed, Err(e) if e.kind() == std::io::ErrorKind::NotFound) {
            // A concurrent delete pruned the parent after it was created
            self.ensure_parent(path, key).await?;
            renamed = fs::rename(temp, path).await;
        }
        if let Err(e) = renamed {
            let _ = fs::remove_file(temp).await;
            return Err(BlobstoreError::from_io(e, key));
        }
        Ok(())
    }

    /// Remove empty directories between `path` and the root
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Every key below `dir`, unsorted
    async fn walk(&self, dir: PathBuf) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![dir];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory) => continue,
                Err(e) => return Err(BlobstoreError::from_io(e, &dir.display().to_string())),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BlobstoreError::from_io(e, &dir.display().to_string()))?
            {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    if path != self.temp_dir {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    match self.key_for(&path) {
                        Some(key) => keys.push(key),
                        None => warn!(path = %path.display(), "Skipping file with non UTF-8 path"),
                    }
                }
            }
        }
        Ok(keys)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        Some(segments?.join("/"))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) => match BlobstoreError::from_io(e, key) {
                BlobstoreError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::IsADirectory => Err(BlobstoreError::not_found(key)),
            Err(e) => Err(BlobstoreError::from_io(e, key)),
        }
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        self.ensure_parent(&path, key).await?;

        let temp = self.temp_path(key).await?;
        if let Err(e) = fs::write(&temp, &content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(BlobstoreError::from_io(e, key));
        }
        self.commit(&temp, &path, key).await
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        let src_path = self.path_for(src)?;
        let dest_path = self.path_for(dest)?;
        if !self.exists(src).await? {
            return Err(BlobstoreError::not_found(src));
        }
        self.ensure_parent(&dest_path, dest).await?;

        let temp = self.temp_path(dest).await?;
        if let Err(e) = fs::copy(&src_path, &temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(match e.kind() {
                std::io::ErrorKind::NotFound => BlobstoreError::not_found(src),
                _ => BlobstoreError::from_io(e, dest),
            });
        }
        self.commit(&temp, &dest_path, dest).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if !self.exists(key).await? {
            return Err(BlobstoreError::not_found(key));
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| BlobstoreError::from_io(e, key))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    /// Every call walks and sorts the whole subtree holding `prefix`, so
    /// paging through `n` keys costs O(n² / limit).
    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        // Only the directory holding the prefix's last segment can contain matches
        let base = match prefix.rfind('/') {
            Some(idx) => self.path_for(&prefix[..idx])?,
            None => self.root.clone(),
        };

        let mut keys: Vec<String> = self
            .walk(base)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| start_after.map_or(true, |token| key.as_str() > token))
            .collect();
        keys.sort_unstable();
        keys.truncate(limit);

        let next = if keys.len() == limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }
}
