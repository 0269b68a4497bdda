//! Manifest-driven cache synchronization.
//!
//! This module provides the [`CacheWorker`], which reconciles a persistent
//! content store against a deploy manifest and serves intercepted requests
//! from it:
//! - install stages a force-refreshed copy of the shell resources;
//! - activation diffs the previous manifest against the current one,
//!   keeping unchanged resources and evicting the rest;
//! - requests are served cache-first, except the root document which is
//!   online-first with offline fallback;
//! - out-of-band commands force activation or bulk-prefetch everything.

pub mod worker;

pub use worker::{CacheWorker, Request, SyncError, WorkerState, DOWNLOAD_OFFLINE, SKIP_WAITING};
