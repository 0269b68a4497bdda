//! shellcache - manifest-driven offline cache synchronization.
//!
//! Given a deploy-time manifest mapping resource keys to content
//! fingerprints, this crate reconciles a persistent cache store so it holds
//! exactly the resources the manifest names: unchanged resources are kept
//! without refetching, changed or orphaned ones are evicted, and the
//! application shell is force-refreshed on every install. Intercepted
//! requests are served cache-first, except the root document which is
//! online-first with offline fallback.
//!
//! The store and network boundaries are traits ([`StoreProvider`],
//! [`Fetcher`]), so the synchronizer runs unchanged against in-memory
//! stores in tests and disk-backed stores in the CLI.

pub mod config;
pub mod fetch;
pub mod manifest;
pub mod store;
pub mod sync;

pub use config::Config;
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestFile, ROOT_KEY};
pub use store::{CachedResponse, DiskStores, MemoryStores, Store, StoreError, StoreProvider};
pub use sync::{CacheWorker, Request, SyncError, WorkerState, DOWNLOAD_OFFLINE, SKIP_WAITING};
