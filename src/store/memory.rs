//! In-memory store implementation.
//!
//! Backs the synchronizer in tests and anywhere persistence is not
//! wanted. Cheap to clone; clones share the same underlying state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{CachedResponse, Store, StoreError, StoreProvider};

type Entries = HashMap<String, CachedResponse>;
type Shared = Arc<Mutex<HashMap<String, Entries>>>;

#[derive(Clone, Default)]
pub struct MemoryStores {
    inner: Shared,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the stores currently present, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner).keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StoreProvider for MemoryStores {
    type Store = MemoryStore;

    async fn open(&self, name: &str) -> Result<MemoryStore, StoreError> {
        lock(&self.inner).entry(name.to_string()).or_default();
        Ok(MemoryStore {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        lock(&self.inner).remove(name);
        Ok(())
    }
}

pub struct MemoryStore {
    name: String,
    inner: Shared,
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        Ok(lock(&self.inner)
            .get(&self.name)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, key: &str, response: CachedResponse) -> Result<(), StoreError> {
        lock(&self.inner)
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.inner)
            .get_mut(&self.name)
            .and_then(|entries| entries.remove(key))
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.inner)
            .get(&self.name)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, HashMap<String, Entries>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let stores = MemoryStores::new();
        let store = stores.open("content").await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        store
            .put("a", CachedResponse::new(200, Vec::new(), b"body".to_vec()))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().body, b"body");

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_discards_store() {
        let stores = MemoryStores::new();
        let store = stores.open("temp").await.unwrap();
        store
            .put("a", CachedResponse::new(200, Vec::new(), Vec::new()))
            .await
            .unwrap();

        stores.remove("temp").await.unwrap();
        assert!(stores.names().is_empty());

        // A reopened store starts empty.
        let store = stores.open("temp").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let stores = MemoryStores::new();
        let other = stores.clone();
        let store = stores.open("content").await.unwrap();
        store
            .put("a", CachedResponse::new(200, Vec::new(), Vec::new()))
            .await
            .unwrap();

        let view = other.open("content").await.unwrap();
        assert_eq!(view.keys().await.unwrap(), vec!["a".to_string()]);
    }
}
