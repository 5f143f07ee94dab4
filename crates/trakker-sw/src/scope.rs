//! Per-worker global scope: everything a worker's handlers can reach.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use trakker_net::Fetcher;
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::SwConfig;
use crate::registration::ServiceWorkerId;

/// The `self` of a running service worker.
pub struct WorkerGlobalScope {
    /// Worker this scope belongs to.
    pub worker_id: ServiceWorkerId,

    /// Registration scope URL.
    pub scope: Url,

    /// Configuration the worker was built from.
    pub config: Arc<SwConfig>,

    /// Origin-wide cache storage.
    pub caches: Arc<CacheStorage>,

    /// Open pages.
    pub clients: Arc<RwLock<Clients>>,

    fetcher: Arc<dyn Fetcher>,
    skip_waiting: AtomicBool,
    background: Mutex<JoinSet<()>>,
}

impl WorkerGlobalScope {
    pub fn new(
        worker_id: ServiceWorkerId,
        scope: Url,
        config: Arc<SwConfig>,
        caches: Arc<CacheStorage>,
        clients: Arc<RwLock<Clients>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            worker_id,
            scope,
            config,
            caches,
            clients,
            fetcher,
            skip_waiting: AtomicBool::new(false),
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Network access.
    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Name of this worker's cache generation.
    pub fn cache_name(&self) -> String {
        self.config.cache_name()
    }

    /// Ask to activate as soon as install finishes.
    pub fn skip_waiting(&self) {
        debug!(worker = %self.worker_id, "skipWaiting requested");
        self.skip_waiting.store(true, Ordering::Release);
    }

    /// Whether `skip_waiting` was called.
    pub fn wants_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Run work that outlives the event that started it.
    pub async fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut background = self.background.lock().await;
        // Reap finished tasks so the set does not grow without bound.
        while background.try_join_next().is_some() {}
        background.spawn(task);
    }

    /// Wait for all background work to finish.
    pub async fn settle(&self) {
        let mut background = self.background.lock().await;
        while let Some(result) = background.join_next().await {
            if let Err(e) = result {
                warn!(worker = %self.worker_id, error = %e, "Background task panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerGlobalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGlobalScope")
            .field("worker_id", &self.worker_id)
            .field("scope", &self.scope.as_str())
            .field("cache_name", &self.cache_name())
            .field("skip_waiting", &self.wants_skip_waiting())
            .finish_non_exhaustive()
    }
}
