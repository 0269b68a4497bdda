use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fetch::{FetchError, Fetcher};
use crate::manifest::{request_url, resource_key, Manifest, ROOT_KEY};
use crate::store::{CachedResponse, Store, StoreError, StoreProvider};

// ============================================================================
// Constants
// ============================================================================

/// Store holding the single persisted copy of the last-synchronized manifest.
const MANIFEST_STORE: &str = "app-manifest";

/// Staging store populated during install.
const TEMP_STORE: &str = "temp-cache";

/// Long-lived content store served from during request interception.
const CONTENT_STORE: &str = "app-cache";

/// Key of the one entry in the manifest store.
const MANIFEST_KEY: &str = "manifest";

/// Out-of-band command: immediately activate a waiting worker. The caller
/// is responsible for reloading clients afterward.
pub const SKIP_WAITING: &str = "skipWaiting";

/// Out-of-band command: prefetch every manifest resource not yet cached.
pub const DOWNLOAD_OFFLINE: &str = "downloadOffline";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("unexpected status {status} fetching {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("persisted manifest is unreadable: {0}")]
    BadManifest(#[from] serde_json::Error),

    #[error("worker is not active (state: {0:?})")]
    NotActive(WorkerState),
}

/// Lifecycle of one worker version. The host drives `install` and
/// `activate` in order and only dispatches requests once the worker is
/// `Active`; `Installed` is the waiting state a `skipWaiting` command can
/// promote out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Installing,
    Installed,
    Activating,
    Active,
}

/// An intercepted request: method plus full URL.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// The cache synchronizer.
///
/// Holds the current deploy manifest and reconciles the injected stores
/// against it. All store and network access goes through the injected
/// [`StoreProvider`] and [`Fetcher`] seams.
pub struct CacheWorker<P: StoreProvider, F: Fetcher> {
    manifest: Manifest,
    shell: Vec<String>,
    origin: String,
    stores: P,
    fetcher: F,
    state: Mutex<WorkerState>,
}

impl<P: StoreProvider, F: Fetcher> CacheWorker<P, F> {
    pub fn new(
        manifest: Manifest,
        shell: Vec<String>,
        origin: impl Into<String>,
        stores: P,
        fetcher: F,
    ) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self {
            manifest,
            shell,
            origin,
            stores,
            fetcher,
            state: Mutex::new(WorkerState::Idle),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    // ========================================================================
    // Install
    // ========================================================================

    /// Install phase: fetch every shell resource with forced revalidation
    /// into the staging store. All-or-nothing: a single failure clears the
    /// staging store and fails the phase, leaving retries to the host's
    /// normal install retry policy.
    pub async fn install(&self) -> Result<(), SyncError> {
        self.set_state(WorkerState::Installing);
        match self.populate_staging().await {
            Ok(()) => {
                info!(resources = self.shell.len(), "install complete");
                self.set_state(WorkerState::Installed);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "install failed, clearing staging store");
                if let Err(remove_err) = self.stores.remove(TEMP_STORE).await {
                    warn!(error = %remove_err, "failed to clear staging store");
                }
                self.set_state(WorkerState::Idle);
                Err(err)
            }
        }
    }

    async fn populate_staging(&self) -> Result<(), SyncError> {
        let temp = self.stores.open(TEMP_STORE).await?;
        for key in &self.shell {
            let url = request_url(&self.origin, key);
            let response = self.fetch_checked(&url, true).await?;
            temp.put(&url, response).await?;
        }
        Ok(())
    }

    /// Fetch a resource and require a successful status.
    async fn fetch_checked(&self, url: &str, revalidate: bool) -> Result<CachedResponse, SyncError> {
        let response = self
            .fetcher
            .fetch(url, revalidate)
            .await
            .map_err(|source| SyncError::Fetch {
                url: url.to_string(),
                source,
            })?;
        if !response.ok() {
            return Err(SyncError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Activation phase: run the reconciliation transaction.
    ///
    /// Either commits a fully consistent content store and persists the
    /// current manifest, or tears down all three stores so nothing partial
    /// can be mistaken for valid state. The worker goes `Active` either
    /// way; after a teardown it serves lazily from an empty cache and the
    /// error is returned so the caller knows the cache was reset.
    pub async fn activate(&self) -> Result<(), SyncError> {
        self.set_state(WorkerState::Activating);
        let result = self.reconcile().await;
        if let Err(err) = &result {
            warn!(error = %err, "reconciliation failed, discarding all stores");
            self.teardown().await;
        }
        self.set_state(WorkerState::Active);
        result
    }

    async fn reconcile(&self) -> Result<(), SyncError> {
        let holder = self.stores.open(MANIFEST_STORE).await?;
        let previous = match holder.get(MANIFEST_KEY).await? {
            Some(entry) => Some(Manifest::from_json(&entry.body)?),
            None => None,
        };

        match previous {
            None => {
                // First install ever: nothing in the content store can be
                // trusted against any manifest, so rebuild from staging.
                debug!("no prior manifest, rebuilding content store from staging");
                self.stores.remove(CONTENT_STORE).await?;
                let content = self.stores.open(CONTENT_STORE).await?;
                self.promote_staged(&content).await?;
            }
            Some(old) => {
                let content = self.stores.open(CONTENT_STORE).await?;
                self.evict_stale(&content, &old).await?;
                self.promote_staged(&content).await?;
            }
        }

        // Persisted only after a fully successful reconciliation.
        let entry = CachedResponse::new(200, Vec::new(), self.manifest.to_json());
        holder.put(MANIFEST_KEY, entry).await?;
        info!(resources = self.manifest.len(), "cache synchronized");
        Ok(())
    }

    /// Evict every content entry absent from the current manifest or whose
    /// fingerprint changed since the previous one. Entries unchanged
    /// between the two manifests are kept and reused without refetching.
    async fn evict_stale(&self, content: &P::Store, previous: &Manifest) -> Result<(), SyncError> {
        for url in content.keys().await? {
            let Some(key) = resource_key(&self.origin, &url) else {
                // An entry outside our origin can never be served by this
                // worker; drop it rather than let it accumulate.
                debug!(url = %url, "evicting entry outside origin");
                content.delete(&url).await?;
                continue;
            };
            let current = self.manifest.fingerprint(&key);
            if current.is_none() || current != previous.fingerprint(&key) {
                debug!(key = %key, "evicting stale entry");
                content.delete(&url).await?;
            }
        }
        Ok(())
    }

    /// Copy every staged shell resource into the content store, overwriting
    /// any kept entry, then discard the staging store. Shell resources are
    /// never "kept", only refreshed.
    async fn promote_staged(&self, content: &P::Store) -> Result<(), SyncError> {
        let temp = self.stores.open(TEMP_STORE).await?;
        for url in temp.keys().await? {
            if let Some(response) = temp.get(&url).await? {
                content.put(&url, response).await?;
            }
        }
        self.stores.remove(TEMP_STORE).await?;
        Ok(())
    }

    /// Best-effort removal of all three stores after a failed
    /// reconciliation. The next install/activate cycle rebuilds from
    /// scratch.
    async fn teardown(&self) {
        for name in [CONTENT_STORE, TEMP_STORE, MANIFEST_STORE] {
            if let Err(err) = self.stores.remove(name).await {
                warn!(store = name, error = %err, "failed to remove store during teardown");
            }
        }
    }

    // ========================================================================
    // Request interception
    // ========================================================================

    /// Intercept one request.
    ///
    /// `Ok(None)` declines interception: the request is not a GET or does
    /// not name a manifest resource and should fall through to the host's
    /// default network handling. The root document is served online-first;
    /// everything else cache-first.
    pub async fn handle_request(
        &self,
        request: &Request,
    ) -> Result<Option<CachedResponse>, SyncError> {
        if !request.is_get() {
            return Ok(None);
        }
        let Some(key) = resource_key(&self.origin, &request.url) else {
            return Ok(None);
        };
        if !self.manifest.contains(&key) {
            return Ok(None);
        }

        if key == ROOT_KEY {
            self.online_first(&request.url, &key).await.map(Some)
        } else {
            self.cache_first(&request.url, &key).await.map(Some)
        }
    }

    /// Online-first: the live response wins and refreshes the cached copy;
    /// the cached copy is the offline fallback. The original fetch error
    /// is re-raised when no fallback exists.
    async fn online_first(&self, url: &str, key: &str) -> Result<CachedResponse, SyncError> {
        let content = self.stores.open(CONTENT_STORE).await?;
        let cache_key = request_url(&self.origin, key);
        match self.fetcher.fetch(url, false).await {
            Ok(response) => {
                content.put(&cache_key, response.clone()).await?;
                Ok(response)
            }
            Err(source) => match content.get(&cache_key).await? {
                Some(cached) => {
                    debug!(key = %key, "network failed, serving cached copy");
                    Ok(cached)
                }
                None => Err(SyncError::Fetch {
                    url: url.to_string(),
                    source,
                }),
            },
        }
    }

    /// Cache-first: a cached copy wins; a miss is fetched live and stored
    /// only when the response is ok. Fetch failures propagate as-is with
    /// no fallback.
    async fn cache_first(&self, url: &str, key: &str) -> Result<CachedResponse, SyncError> {
        let content = self.stores.open(CONTENT_STORE).await?;
        let cache_key = request_url(&self.origin, key);
        if let Some(cached) = content.get(&cache_key).await? {
            return Ok(cached);
        }

        let response = self
            .fetcher
            .fetch(url, false)
            .await
            .map_err(|source| SyncError::Fetch {
                url: url.to_string(),
                source,
            })?;
        if response.ok() {
            content.put(&cache_key, response.clone()).await?;
        }
        Ok(response)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Handle an out-of-band command string. Unknown messages are ignored.
    pub async fn handle_message(&self, message: &str) -> Result<(), SyncError> {
        match message {
            SKIP_WAITING => {
                // Promote a waiting worker. In-flight clients are not
                // transitioned; the caller triggers a reload afterward.
                if self.state() == WorkerState::Installed {
                    info!("skipWaiting: activating immediately");
                    self.activate().await
                } else {
                    debug!(state = ?self.state(), "skipWaiting ignored");
                    Ok(())
                }
            }
            DOWNLOAD_OFFLINE => {
                let state = self.state();
                if state != WorkerState::Active {
                    return Err(SyncError::NotActive(state));
                }
                self.download_offline().await
            }
            other => {
                debug!(message = other, "ignoring unknown message");
                Ok(())
            }
        }
    }

    /// Fetch every manifest resource not already present in the content
    /// store. All-or-nothing at the batch level: nothing is stored unless
    /// every fetch succeeded.
    pub async fn download_offline(&self) -> Result<(), SyncError> {
        let content = self.stores.open(CONTENT_STORE).await?;
        let mut present = HashSet::new();
        for url in content.keys().await? {
            if let Some(key) = resource_key(&self.origin, &url) {
                present.insert(key);
            }
        }

        let missing: Vec<&str> = self
            .manifest
            .keys()
            .filter(|key| !present.contains(*key))
            .collect();
        if missing.is_empty() {
            debug!("offline download: nothing missing");
            return Ok(());
        }

        info!(resources = missing.len(), "prefetching missing resources");
        let fetches = missing.iter().map(|key| {
            let url = request_url(&self.origin, key);
            async move {
                let response = self.fetch_checked(&url, false).await?;
                Ok::<_, SyncError>((url, response))
            }
        });
        let fetched = try_join_all(fetches).await?;
        for (url, response) in fetched {
            content.put(&url, response).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
