//! Install-time population of the current cache generation.

use tracing::{error, info};
use url::Url;

use crate::scope::WorkerGlobalScope;
use crate::ServiceWorkerError;

/// Precaches the asset manifest into the worker's cache generation.
pub struct PrecacheManager<'a> {
    scope: &'a WorkerGlobalScope,
}

impl<'a> PrecacheManager<'a> {
    pub fn new(scope: &'a WorkerGlobalScope) -> Self {
        Self { scope }
    }

    /// Resolve relative manifest paths against the scope URL.
    pub fn resolve_manifest(scope: &Url, assets: &[String]) -> Result<Vec<Url>, ServiceWorkerError> {
        assets
            .iter()
            .map(|path| {
                scope.join(path).map_err(|e| {
                    ServiceWorkerError::InstallFailed(format!("cannot resolve '{path}': {e}"))
                })
            })
            .collect()
    }

    /// Fetch and store every manifest asset, or nothing.
    ///
    /// The generation is opened before fetching; removing it again after a
    /// failed or timed-out install is up to the container.
    pub async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let scope = self.scope;
        let urls = Self::resolve_manifest(&scope.scope, &scope.config.precache_assets)?;
        let cache_name = scope.cache_name();
        let cache = scope.caches.open(&cache_name).await;

        match cache.add_all(scope.fetcher(), &urls).await {
            Ok(committed) => {
                info!(cache = %cache_name, committed, "Precache complete");
                Ok(committed)
            }
            Err(e) => {
                error!(cache = %cache_name, error = %e, "Precache failed");
                Err(ServiceWorkerError::InstallFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_manifest_subdirectory_safe() {
        let scope = Url::parse("https://example.com/tools/trakker/").unwrap();
        let assets = vec!["./".to_string(), "./css/styles.css".to_string()];

        let urls: Vec<String> = PrecacheManager::resolve_manifest(&scope, &assets)
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            urls,
            vec![
                "https://example.com/tools/trakker/",
                "https://example.com/tools/trakker/css/styles.css",
            ]
        );
    }

    #[test]
    fn test_resolve_manifest_at_root() {
        let scope = Url::parse("https://example.com/").unwrap();
        let urls = PrecacheManager::resolve_manifest(&scope, &["./index.html".to_string()]).unwrap();
        assert_eq!(urls[0].as_str(), "https://example.com/index.html");
    }
}
