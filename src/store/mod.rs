//! Persistent store boundary.
//!
//! The synchronizer works against named key-value stores of full responses
//! (key = canonical request URL, value = body plus status and headers).
//! Three named stores are in play: a staging store populated during
//! install, the long-lived content store served from during interception,
//! and a single-entry store holding the last-synchronized manifest.
//!
//! Stores provide last-write-wins semantics per key and nothing more; the
//! synchronizer never relies on cross-key transactionality.

pub mod disk;
pub mod memory;

pub use disk::DiskStores;
pub use memory::MemoryStores;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored response: opaque body bytes plus status and headers, stamped
/// with the time it was fetched. The timestamp is informational only and
/// never consulted by any serving policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            fetched_at: Utc::now(),
        }
    }

    /// Whether the response carried a successful status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One named store: get/put/delete/enumerate by request identity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, StoreError>;

    async fn put(&self, key: &str, response: CachedResponse) -> Result<(), StoreError>;

    /// Returns whether an entry was present.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Factory for named stores. `open` creates the store if it does not
/// exist; `remove` discards a store and all of its entries.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    type Store: Store;

    async fn open(&self, name: &str) -> Result<Self::Store, StoreError>;

    async fn remove(&self, name: &str) -> Result<(), StoreError>;
}
