//! Network boundary.
//!
//! The synchronizer fetches through the [`Fetcher`] trait so tests can
//! substitute a scripted fake. The real implementation is a thin wrapper
//! over reqwest that captures the full response as an opaque
//! [`CachedResponse`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use thiserror::Error;

use crate::store::CachedResponse;

/// HTTP request timeout in seconds.
/// There is no cancellation logic downstream, so a hung fetch would hang
/// the dependent response without this bound.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("resource unavailable: {0}")]
    Unavailable(String),
}

/// One live fetch of a same-origin resource. `revalidate` forces
/// cache-bypassing revalidation, used when refreshing shell resources
/// during install.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, revalidate: bool) -> Result<CachedResponse, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, url: &str, revalidate: bool) -> Result<CachedResponse, FetchError> {
        (**self).fetch(url, revalidate).await
    }
}

/// Fetcher backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, revalidate: bool) -> Result<CachedResponse, FetchError> {
        let mut request = self.client.get(url);
        if revalidate {
            request = request.header(header::CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(CachedResponse::new(status, headers, body))
    }
}
