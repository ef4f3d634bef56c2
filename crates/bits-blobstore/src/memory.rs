//! In-memory backend for tests and single-process deployments

use crate::{Backend, BlobstoreError, ListPage, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// An in-memory backend, optionally capped at a total byte capacity
#[derive(Clone, Default)]
pub struct MemoryBackend {
    blobs: Arc<RwLock<BTreeMap<String, Bytes>>>,
    capacity_bytes: Option<u64>,
}

impl MemoryBackend {
    /// Create a new empty, unbounded backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that fails writes with `NoSpaceLeft` past `capacity_bytes`
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            blobs: Arc::default(),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    /// Get the number of blobs stored
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Check if the backend is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Get total size of all blobs
    pub fn total_size(&self) -> u64 {
        self.blobs.read().values().map(|b| b.len() as u64).sum()
    }

    fn insert(blobs: &mut BTreeMap<String, Bytes>, capacity: Option<u64>, key: &str, content: Bytes) -> Result<()> {
        if let Some(capacity) = capacity {
            let used: u64 = blobs.values().map(|b| b.len() as u64).sum();
            let replaced = blobs.get(key).map(|b| b.len() as u64).unwrap_or(0);
            if used - replaced + content.len() as u64 > capacity {
                return Err(BlobstoreError::NoSpaceLeft);
            }
        }
        blobs.insert(key.to_string(), content);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobstoreError::not_found(key))
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let mut blobs = self.blobs.write();
        Self::insert(&mut blobs, self.capacity_bytes, key, content)
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        let mut blobs = self.blobs.write();
        let content = blobs
            .get(src)
            .cloned()
            .ok_or_else(|| BlobstoreError::not_found(src))?;
        Self::insert(&mut blobs, self.capacity_bytes, dest, content)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobstoreError::not_found(key))
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        let start = match start_after {
            Some(token) if token >= prefix => Bound::Excluded(token),
            _ => Bound::Included(prefix),
        };

        let blobs = self.blobs.read();
        let keys: Vec<String> = blobs
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect();

        let next = if keys.len() == limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    async fn delete_many(&self, keys: Vec<String>, _concurrency: usize) -> Result<usize> {
        let mut blobs = self.blobs.write();
        Ok(keys.iter().filter(|key| blobs.remove(key.as_str()).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryBackend::new();
        let data = Bytes::from_static(b"hello world");

        store.put("packages/guid", data.clone()).await.unwrap();
        let retrieved = store.get("packages/guid").await.unwrap();

        assert_eq!(data, retrieved);
    }

    #[tokio::test]
    async fn test_exists() {
        let store = MemoryBackend::new();

        assert!(!store.exists("guid").await.unwrap());
        store.put("guid", Bytes::from_static(b"test")).await.unwrap();
        assert!(store.exists("guid").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryBackend::new();
        let err = store.delete("missing").await.unwrap_err();
        assert!(matches!(err, BlobstoreError::NotFound { ref key } if key == "missing"));
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let store = MemoryBackend::new();
        let err = store.copy("missing", "dest").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("dest").await.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_exhaustion() {
        let store = MemoryBackend::with_capacity(10);
        store.put("a", Bytes::from_static(b"12345")).await.unwrap();
        // Replacing counts only the new size
        store.put("a", Bytes::from_static(b"1234567890")).await.unwrap();

        let err = store.put("b", Bytes::from_static(b"1")).await.unwrap_err();
        assert!(err.is_no_space_left());
        assert!(!store.exists("b").await.unwrap());
        assert_eq!(store.total_size(), 10);
    }

    #[tokio::test]
    async fn test_list_pages_in_order() {
        let store = MemoryBackend::new();
        for key in ["p/c", "p/a", "q/z", "p/b", "o/y"] {
            store.put(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let first = store.list_page("p/", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["p/a", "p/b"]);
        assert_eq!(first.next.as_deref(), Some("p/b"));

        let second = store.list_page("p/", first.next.as_deref(), 2).await.unwrap();
        assert_eq!(second.keys, vec!["p/c"]);
        assert!(second.next.is_none());
    }
}
