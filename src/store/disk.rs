//! Disk-backed store implementation.
//!
//! Each named store is one JSON file under the cache directory holding the
//! full entry map. Entry bodies are small static assets, so whole-file
//! read-modify-write keeps the implementation simple and gives the same
//! last-write-wins guarantee per store file.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{CachedResponse, Store, StoreError, StoreProvider};

#[derive(Clone)]
pub struct DiskStores {
    root: PathBuf,
}

impl DiskStores {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

#[async_trait]
impl StoreProvider for DiskStores {
    type Store = DiskStore;

    async fn open(&self, name: &str) -> Result<DiskStore, StoreError> {
        Ok(DiskStore {
            path: self.store_path(name),
        })
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.store_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

pub struct DiskStore {
    path: PathBuf,
}

impl DiskStore {
    fn load(&self) -> Result<HashMap<String, CachedResponse>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn save(&self, entries: &HashMap<String, CachedResponse>) -> Result<(), StoreError> {
        let contents = serde_json::to_vec(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

#[async_trait]
impl Store for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    async fn put(&self, key: &str, response: CachedResponse) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), response);
        self.save(&entries)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.load()?;
        let removed = entries.remove(key).is_some();
        if removed {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load()?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStores::new(dir.path().to_path_buf()).unwrap();

        let store = stores.open("content").await.unwrap();
        store
            .put("a", CachedResponse::new(200, Vec::new(), b"body".to_vec()))
            .await
            .unwrap();
        drop(store);

        let store = stores.open("content").await.unwrap();
        let cached = store.get("a").await.unwrap().unwrap();
        assert_eq!(cached.body, b"body");
        assert_eq!(cached.status, 200);
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStores::new(dir.path().to_path_buf()).unwrap();

        let store = stores.open("temp").await.unwrap();
        store
            .put("a", CachedResponse::new(200, Vec::new(), Vec::new()))
            .await
            .unwrap();

        stores.remove("temp").await.unwrap();
        assert!(!dir.path().join("temp.json").exists());

        // Removing an absent store is not an error.
        stores.remove("temp").await.unwrap();

        let store = stores.open("temp").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStores::new(dir.path().to_path_buf()).unwrap();

        let store = stores.open("content").await.unwrap();
        store
            .put("a", CachedResponse::new(200, Vec::new(), Vec::new()))
            .await
            .unwrap();
        store
            .put("b", CachedResponse::new(200, Vec::new(), Vec::new()))
            .await
            .unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["b".to_string()]);
    }
}
