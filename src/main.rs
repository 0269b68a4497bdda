//! shellcache CLI - drives a cache synchronization cycle from the shell.
//!
//! `sync` installs and activates a worker for the given deploy manifest,
//! leaving the on-disk cache consistent with it; `prefetch` additionally
//! downloads every manifest resource for full offline coverage.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shellcache::{
    CacheWorker, Config, DiskStores, HttpFetcher, ManifestFile, DOWNLOAD_OFFLINE,
};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Set up logging with environment-based filter
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn usage() -> ! {
    eprintln!("Usage: shellcache <sync|prefetch> [manifest.json]");
    eprintln!();
    eprintln!("  sync      install and activate against the deploy manifest");
    eprintln!("  prefetch  sync, then download every manifest resource");
    eprintln!();
    eprintln!("The manifest path defaults to `manifest_path` in the config file.");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let prefetch = match args.get(1).map(String::as_str) {
        Some("sync") => false,
        Some("prefetch") => true,
        _ => usage(),
    };

    let config = Config::load().context("Failed to load config")?;
    let manifest_path = match args.get(2) {
        Some(path) => PathBuf::from(path),
        None => match config.manifest_path.clone() {
            Some(path) => path,
            None => bail!("No manifest path given and none configured"),
        },
    };

    let deploy = ManifestFile::load(&manifest_path)?;
    info!(
        origin = %deploy.origin,
        resources = deploy.resources.len(),
        shell = deploy.shell.len(),
        "loaded deploy manifest"
    );

    let stores =
        DiskStores::new(config.cache_dir()?).context("Failed to open cache directory")?;
    let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
    let worker = CacheWorker::new(
        deploy.manifest(),
        deploy.shell.clone(),
        deploy.origin.clone(),
        stores,
        fetcher,
    );

    worker.install().await.context("Install failed")?;
    worker
        .activate()
        .await
        .context("Reconciliation failed; the cache was reset and will rebuild on the next sync")?;

    if prefetch {
        worker
            .handle_message(DOWNLOAD_OFFLINE)
            .await
            .context("Offline download failed")?;
        println!("Synchronized and prefetched all resources for {}", deploy.origin);
    } else {
        println!("Synchronized cache for {}", deploy.origin);
    }

    Ok(())
}
