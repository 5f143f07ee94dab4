//! Service worker configuration.
//!
//! Resolved once at startup and shared by `Arc` with every component that
//! needs the cache name, the asset manifest or the offline fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::ServiceWorkerError;

/// Configuration for one deployed version of the offline shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Cache name prefix shared by every generation.
    pub cache_prefix: String,

    /// Version tag. Must change whenever cached asset contents change.
    pub version: String,

    /// Relative asset paths precached on install, in order.
    pub precache_assets: Vec<String>,

    /// Relative path of the page served when offline.
    pub offline_fallback: String,

    /// Upper bound on install and activate work, in seconds.
    pub lifetime_secs: u64,

    /// Total bytes the cache storage may hold. `None` for unlimited.
    pub cache_quota_bytes: Option<u64>,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "trakkertime-cache".to_string(),
            version: "v2".to_string(),
            precache_assets: [
                "./",
                "./index.html",
                "./css/styles.css",
                "./js/app.js",
                "./manifest.webmanifest",
                "./icons/icon-192.png",
                "./icons/icon-512.png",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            offline_fallback: "./index.html".to_string(),
            lifetime_secs: 30,
            cache_quota_bytes: None,
        }
    }
}

impl SwConfig {
    /// Config for a different version tag, everything else unchanged.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Name of the cache generation for this version.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Lifetime bound for extendable events.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    /// Check the config before a worker is built from it.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version tag is empty".to_string()));
        }
        if self.precache_assets.is_empty() {
            return Err(ServiceWorkerError::Config("precache manifest is empty".to_string()));
        }
        if let Some(path) = self
            .precache_assets
            .iter()
            .chain(std::iter::once(&self.offline_fallback))
            .find(|p| Url::parse(p).is_ok())
        {
            return Err(ServiceWorkerError::Config(format!(
                "'{path}' is absolute; manifest paths must be relative to the scope"
            )));
        }
        if !self.precache_assets.contains(&self.offline_fallback) {
            warn!(
                fallback = %self.offline_fallback,
                "Offline fallback is not precached; offline navigations will fail"
            );
        }
        Ok(())
    }

    /// Candidate URLs for the offline page, in lookup order.
    ///
    /// The scope-relative URL comes first, then the same path from the
    /// origin root. Duplicates are dropped when the scope is the root.
    pub fn fallback_candidates(&self, scope: &Url) -> Vec<Url> {
        let mut candidates = Vec::with_capacity(2);
        if let Ok(url) = scope.join(&self.offline_fallback) {
            candidates.push(url);
        }
        let root_relative = format!(
            "/{}",
            self.offline_fallback
                .trim_start_matches("./")
                .trim_start_matches('/')
        );
        if let Ok(url) = scope.join(&root_relative) {
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
        candidates
    }
}
