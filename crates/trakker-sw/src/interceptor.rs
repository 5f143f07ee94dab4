//! Cache-first fetch handling with write-through and an offline fallback.

use std::sync::Arc;

use http::Method;
use tracing::{debug, trace, warn};
use trakker_net::{Request, Response};

use crate::lifecycle::EventOutcome;
use crate::scope::WorkerGlobalScope;
use crate::ServiceWorkerError;

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Page that issued the request.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// Whether a network response may be stored.
fn is_cacheable(response: &Response) -> bool {
    response.status == 200 && !response.is_opaque()
}

/// Answers fetch events for one worker.
pub struct FetchInterceptor {
    scope: Arc<WorkerGlobalScope>,
}

impl FetchInterceptor {
    pub fn new(scope: Arc<WorkerGlobalScope>) -> Self {
        Self { scope }
    }

    /// Handle a fetch event.
    ///
    /// Non-GET requests are not intercepted. GET requests are answered from
    /// the current generation when possible, otherwise from the network,
    /// otherwise with the offline page. Fails only when all three miss.
    pub async fn handle(&self, event: FetchEvent) -> Result<EventOutcome, ServiceWorkerError> {
        let request = event.request;
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Not intercepted");
            return Ok(EventOutcome::Passthrough);
        }

        let cache_name = self.scope.cache_name();
        if let Some(cache) = self.scope.caches.get(&cache_name).await {
            if let Some(hit) = cache.match_request(&request).await {
                trace!(url = %request.url, cache = %cache_name, "Cache hit");
                return Ok(EventOutcome::Respond(hit));
            }
        }

        match self.scope.fetcher().fetch(request.clone()).await {
            Ok(response) => {
                if is_cacheable(&response) {
                    self.store(request, response.clone()).await;
                } else {
                    debug!(
                        url = %request.url,
                        status = response.status,
                        opaque = response.is_opaque(),
                        "Not caching response"
                    );
                }
                Ok(EventOutcome::Respond(response))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed, trying offline page");
                match self.offline_fallback().await {
                    Some(page) => Ok(EventOutcome::Respond(page)),
                    None => Err(ServiceWorkerError::NetworkError(format!(
                        "{} unreachable and no offline page cached: {e}",
                        request.url
                    ))),
                }
            }
        }
    }

    /// Write a copy to the current generation in the background.
    async fn store(&self, request: Request, response: Response) {
        let caches = Arc::clone(&self.scope.caches);
        let cache_name = self.scope.cache_name();
        self.scope
            .spawn_background(async move {
                let cache = caches.open(&cache_name).await;
                if let Err(e) = cache.put(&request, response).await {
                    warn!(url = %request.url, cache = %cache_name, error = %e, "Cache write failed");
                }
            })
            .await;
    }

    /// Look up the offline page: scope-relative first, then root-relative.
    async fn offline_fallback(&self) -> Option<Response> {
        let cache = self.scope.caches.get(&self.scope.cache_name()).await?;
        for candidate in self.scope.config.fallback_candidates(&self.scope.scope) {
            if let Some(page) = cache.match_url(&candidate).await {
                debug!(fallback = %candidate, "Serving offline page");
                return Some(page);
            }
        }
        None
    }
}
