//! Deploy manifest and request-key normalization.
//!
//! A manifest maps logical resource keys (site-relative path strings, with
//! the root document keyed by the `/` sentinel) to opaque content
//! fingerprints. It is built at deploy time, immutable at runtime, and
//! persisted after each successful synchronization so the next upgrade can
//! diff against it and keep unchanged resources without refetching.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Sentinel key for the root document.
pub const ROOT_KEY: &str = "/";

/// Cache-busting query token. The token and everything after it are
/// stripped during key normalization.
const VERSION_TOKEN: &str = "?v=";

/// Mapping of resource key to content fingerprint for one deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: HashMap<String, String>,
}

impl Manifest {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Fingerprint recorded for a resource key, if the key is listed.
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a manifest previously persisted with [`Manifest::to_json`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize for persistence into the manifest-holder store.
    pub fn to_json(&self) -> Vec<u8> {
        // A HashMap of strings cannot fail to serialize.
        serde_json::to_vec(&self.entries).unwrap_or_default()
    }
}

impl FromIterator<(String, String)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Deploy descriptor produced by the build pipeline: the origin the
/// resources are served from, the full resource manifest, and the shell
/// subset that is force-refreshed on every install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub origin: String,
    pub resources: HashMap<String, String>,
    #[serde(default)]
    pub shell: Vec<String>,
}

impl ManifestFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest file: {}", path.display()))
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.resources.clone())
    }
}

/// Normalize a request URL to its logical resource key.
///
/// Strips the origin prefix and any `?v=` cache-busting suffix. The bare
/// origin, a fragment-only navigation (`origin/#...`), and the empty key
/// all normalize to the root sentinel. URLs outside the origin yield
/// `None`; this worker never serves cross-origin requests.
pub fn resource_key(origin: &str, url: &str) -> Option<String> {
    let origin = origin.trim_end_matches('/');
    if url == origin {
        return Some(ROOT_KEY.to_string());
    }
    let rest = url.strip_prefix(origin)?.strip_prefix('/')?;
    let key = match rest.split_once(VERSION_TOKEN) {
        Some((head, _)) => head,
        None => rest,
    };
    if key.is_empty() || key.starts_with('#') {
        return Some(ROOT_KEY.to_string());
    }
    Some(key.to_string())
}

/// Canonical request URL for a resource key, used as the store key so that
/// versioned and unversioned requests for the same resource share one
/// cache entry.
pub fn request_url(origin: &str, key: &str) -> String {
    let origin = origin.trim_end_matches('/');
    if key == ROOT_KEY {
        format!("{}/", origin)
    } else {
        format!("{}/{}", origin, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://app.example";

    #[test]
    fn test_bare_origin_is_root() {
        assert_eq!(resource_key(ORIGIN, "https://app.example"), Some("/".into()));
        assert_eq!(resource_key(ORIGIN, "https://app.example/"), Some("/".into()));
    }

    #[test]
    fn test_fragment_navigation_is_root() {
        assert_eq!(
            resource_key(ORIGIN, "https://app.example/#/route"),
            Some("/".into())
        );
    }

    #[test]
    fn test_plain_path() {
        assert_eq!(
            resource_key(ORIGIN, "https://app.example/main.js"),
            Some("main.js".into())
        );
        assert_eq!(
            resource_key(ORIGIN, "https://app.example/assets/fonts/Icons.ttf"),
            Some("assets/fonts/Icons.ttf".into())
        );
    }

    #[test]
    fn test_version_token_stripped() {
        assert_eq!(
            resource_key(ORIGIN, "https://app.example/main.js?v=abc123"),
            Some("main.js".into())
        );
        // Everything after the token goes with it.
        assert_eq!(
            resource_key(ORIGIN, "https://app.example/main.js?v=1&x=2"),
            Some("main.js".into())
        );
    }

    #[test]
    fn test_cross_origin_declined() {
        assert_eq!(resource_key(ORIGIN, "https://evil.example/main.js"), None);
        // Same scheme, longer host: must not be treated as a prefix match.
        assert_eq!(resource_key(ORIGIN, "https://app.examplemmm/x"), None);
    }

    #[test]
    fn test_trailing_slash_on_origin_ignored() {
        assert_eq!(
            resource_key("https://app.example/", "https://app.example/main.js"),
            Some("main.js".into())
        );
    }

    #[test]
    fn test_request_url_round_trip() {
        assert_eq!(request_url(ORIGIN, "/"), "https://app.example/");
        assert_eq!(request_url(ORIGIN, "main.js"), "https://app.example/main.js");
        assert_eq!(
            resource_key(ORIGIN, &request_url(ORIGIN, "main.js")),
            Some("main.js".into())
        );
        assert_eq!(
            resource_key(ORIGIN, &request_url(ORIGIN, "/")),
            Some("/".into())
        );
    }

    #[test]
    fn test_manifest_json_round_trip() {
        let manifest: Manifest = [
            ("/".to_string(), "aaa".to_string()),
            ("main.js".to_string(), "bbb".to_string()),
        ]
        .into_iter()
        .collect();

        let parsed = Manifest::from_json(&manifest.to_json()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.fingerprint("main.js"), Some("bbb"));
        assert!(!parsed.contains("missing.js"));
    }
}
