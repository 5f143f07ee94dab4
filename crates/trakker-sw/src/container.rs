//! Service worker container (`navigator.serviceWorker`).
//!
//! Owns the registrations, the running workers, the origin's cache storage
//! and its pages, and routes page fetches to the controlling worker.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use trakker_net::{Fetcher, Origin, Request, RequestMode, Response};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::{Client, Clients};
use crate::config::SwConfig;
use crate::interceptor::FetchEvent;
use crate::lifecycle::{offline_shell, EventOutcome, HandlerTable, WorkerEvent};
use crate::registration::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
use crate::scope::WorkerGlobalScope;
use crate::ServiceWorkerError;

/// Options for service worker registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope URL, resolved against the script URL. Defaults to the
    /// script's directory.
    pub scope: Option<String>,
}

/// Service worker events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { registration_scope: String },
    /// Install failed; the previous worker (if any) stays in control.
    InstallFailed {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        error: String,
    },
    /// A page got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

/// A worker that has been started: its global scope and handlers.
struct WorkerRuntime {
    scope: Arc<WorkerGlobalScope>,
    handlers: HandlerTable,
}

/// Service worker container.
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Running workers by ID.
    runtimes: Arc<RwLock<HashMap<ServiceWorkerId, Arc<WorkerRuntime>>>>,

    /// Cache storage.
    pub caches: Arc<CacheStorage>,

    /// Clients.
    pub clients: Arc<RwLock<Clients>>,

    /// Network access for workers and uncontrolled requests.
    fetcher: Arc<dyn Fetcher>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,

    /// Held for writing while a worker activates; routing waits on it.
    activation: RwLock<()>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        caches: Arc<CacheStorage>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                runtimes: Arc::new(RwLock::new(HashMap::new())),
                caches,
                clients: Arc::new(RwLock::new(Clients::new())),
                fetcher,
                event_tx,
                activation: RwLock::new(()),
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Resolve and check the scope for a script.
    ///
    /// The script must be on a secure origin, the scope on the same origin,
    /// and the scope no wider than the script's directory.
    pub fn resolve_scope(script_url: &Url, scope: Option<&str>) -> Result<Url, ServiceWorkerError> {
        let origin = Origin::from_url(script_url);
        if !origin.is_secure() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "{origin} is not a secure context"
            )));
        }

        let scope = script_url
            .join(scope.unwrap_or("./"))
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        if !origin.contains(&scope) {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {scope} is not same-origin with {script_url}"
            )));
        }

        let script_dir = script_url
            .join("./")
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        if !scope.path().starts_with(script_dir.path()) {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {scope} is outside the script directory {script_dir}"
            )));
        }

        Ok(scope)
    }

    /// Register a service worker built from `config`, install it and, if it
    /// asks to skip waiting, activate it.
    ///
    /// Returns the registration scope. On install failure the new worker is
    /// discarded and any previously active worker keeps control.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        config: SwConfig,
    ) -> Result<Url, ServiceWorkerError> {
        config.validate()?;
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(format!("{script_url}: {e}")))?;
        let scope = Self::resolve_scope(&script_url, options.scope.as_deref())?;
        let scope_key = scope.to_string();
        let config = Arc::new(config);

        let worker = ServiceWorker::new(script_url.clone(), config.cache_name());
        let worker_id = worker.id;
        let superseded = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_key.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            let superseded = registration.installing.as_ref().map(|w| w.id);
            registration.update(worker);
            superseded
        };
        if let Some(old) = superseded {
            self.runtimes.write().await.remove(&old);
        }

        info!(script = %script_url, scope = %scope, cache = %config.cache_name(), "Registering service worker");
        self.emit(ServiceWorkerEvent::UpdateFound {
            registration_scope: scope_key.clone(),
        });

        let global = Arc::new(WorkerGlobalScope::new(
            worker_id,
            scope.clone(),
            Arc::clone(&config),
            Arc::clone(&self.caches),
            Arc::clone(&self.clients),
            Arc::clone(&self.fetcher),
        ));
        let runtime = Arc::new(WorkerRuntime {
            handlers: offline_shell(Arc::clone(&global)),
            scope: global,
        });
        self.runtimes
            .write()
            .await
            .insert(worker_id, Arc::clone(&runtime));

        let cache_name = config.cache_name();
        let generation_existed = self.caches.has(&cache_name).await;
        let installed = runtime
            .handlers
            .dispatch_extendable(WorkerEvent::Install, config.lifetime())
            .await;

        match installed {
            Ok(_) => {
                let mut registrations = self.registrations.write().await;
                let registration = registrations
                    .get_mut(&scope_key)
                    .ok_or_else(|| ServiceWorkerError::NotFound(scope_key.clone()))?;
                if let Err(e) = registration.install_complete(worker_id) {
                    drop(registrations);
                    self.runtimes.write().await.remove(&worker_id);
                    return Err(e);
                }
            }
            Err(e) => {
                if !generation_existed && self.caches.delete(&cache_name).await {
                    debug!(cache = %cache_name, "Removed generation left by failed install");
                }
                self.fail_install(&scope_key, worker_id, &e).await;
                return Err(e);
            }
        }

        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: scope_key.clone(),
            worker_id,
            new_state: ServiceWorkerState::Installed,
        });

        if runtime.scope.wants_skip_waiting() {
            self.activate(&scope).await?;
        } else {
            debug!(worker = %worker_id, "Installed worker is waiting");
        }

        Ok(scope)
    }

    async fn fail_install(&self, scope_key: &str, worker_id: ServiceWorkerId, error: &ServiceWorkerError) {
        warn!(scope = %scope_key, worker = %worker_id, error = %error, "Install failed");
        {
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(scope_key) {
                let _ = registration.install_failed(worker_id, error);
                if !registration.has_worker() {
                    registrations.remove(scope_key);
                }
            }
        }
        self.runtimes.write().await.remove(&worker_id);
        self.emit(ServiceWorkerEvent::InstallFailed {
            registration_scope: scope_key.to_string(),
            worker_id,
            error: error.to_string(),
        });
    }

    /// Activate the waiting worker of a registration.
    ///
    /// Activation handler failures are logged; the worker still activates.
    /// Fetch routing waits until the new worker is `Activated`.
    pub async fn activate(&self, scope: &Url) -> Result<(), ServiceWorkerError> {
        let _activating = self.activation.write().await;
        let scope_key = scope.to_string();
        let (worker_id, previous) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(&scope_key)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope_key.clone()))?;
            let previous = registration.get_active().map(|w| w.id);
            (registration.begin_activate()?, previous)
        };

        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: scope_key.clone(),
            worker_id,
            new_state: ServiceWorkerState::Activating,
        });

        let runtime = self
            .runtimes
            .read()
            .await
            .get(&worker_id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(worker_id.to_string()))?;
        if let Err(e) = runtime
            .handlers
            .dispatch_extendable(WorkerEvent::Activate, runtime.scope.config.lifetime())
            .await
        {
            warn!(worker = %worker_id, error = %e, "Activate handler failed");
        }

        self.registrations
            .write()
            .await
            .get_mut(&scope_key)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope_key.clone()))?
            .finish_activate(worker_id)?;

        if let Some(old) = previous {
            self.runtimes.write().await.remove(&old);
        }

        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: scope_key,
            worker_id,
            new_state: ServiceWorkerState::Activated,
        });
        for client in self.clients.read().await.controlled_by(worker_id) {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id: client.id.clone(),
                worker_id,
            });
        }

        Ok(())
    }

    /// Open a page.
    ///
    /// A page under the scope of an activated worker is controlled by it
    /// from the start. Other pages stay uncontrolled until a worker claims
    /// them.
    pub async fn open_client(&self, url: Url) -> Client {
        let _routing = self.activation.read().await;
        let controller = match self.get_registration(&url).await {
            Some(scope) => self
                .active_worker(&scope)
                .await
                .filter(ServiceWorker::is_active)
                .map(|w| w.id),
            None => None,
        };
        debug!(url = %url, controller = ?controller, "Page opened");
        self.clients.write().await.open(url, controller)
    }

    /// Close a page.
    pub async fn close_client(&self, client_id: &str) -> Option<Client> {
        self.clients.write().await.remove(client_id)
    }

    /// Scope of the registration that matches `url` best.
    pub async fn get_registration(&self, url: &Url) -> Option<Url> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|(scope, _)| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, registration)| registration.scope.clone())
    }

    /// Get all registration scopes.
    pub async fn get_registrations(&self) -> Vec<Url> {
        self.registrations
            .read()
            .await
            .values()
            .map(|r| r.scope.clone())
            .collect()
    }

    /// The active worker of a registration.
    pub async fn active_worker(&self, scope: &Url) -> Option<ServiceWorker> {
        self.registrations
            .read()
            .await
            .get(scope.as_str())
            .and_then(|r| r.get_active().cloned())
    }

    /// The runtime that should see a request, if any.
    ///
    /// A request from a controlled page goes to its controller. Requests
    /// without a page (navigations) are routed by URL to the best-matching
    /// registration. Only activated workers receive fetches.
    async fn controller_for(&self, request: &Request, client_id: Option<&str>) -> Option<Arc<WorkerRuntime>> {
        let worker_id = match client_id {
            Some(id) => self.clients.read().await.get(id)?.controller?,
            None => {
                let scope = self.get_registration(&request.url).await?;
                let worker = self.active_worker(&scope).await?;
                worker.id
            }
        };

        let active = self
            .registrations
            .read()
            .await
            .values()
            .filter_map(|r| r.get_active())
            .any(|w| w.id == worker_id && w.is_active());
        if !active {
            return None;
        }
        self.runtimes.read().await.get(&worker_id).cloned()
    }

    /// Fetch on behalf of a page.
    pub async fn fetch(
        &self,
        request: Request,
        client_id: Option<&str>,
    ) -> Result<Response, ServiceWorkerError> {
        let controller = {
            let _routing = self.activation.read().await;
            self.controller_for(&request, client_id).await
        };
        if let Some(runtime) = controller {
            let event = FetchEvent {
                request: request.clone(),
                client_id: client_id.map(String::from),
            };
            match runtime.handlers.dispatch(WorkerEvent::Fetch(event)).await? {
                EventOutcome::Respond(response) => return Ok(response),
                EventOutcome::Passthrough | EventOutcome::Done => {}
            }
        } else if request.mode == RequestMode::Navigate {
            debug!(url = %request.url, "Uncontrolled navigation");
        }

        self.fetcher
            .fetch(request)
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))
    }

    /// Wait for every running worker's background cache writes.
    pub async fn settle(&self) {
        let runtimes: Vec<Arc<WorkerRuntime>> =
            self.runtimes.read().await.values().cloned().collect();
        for runtime in runtimes {
            runtime.scope.settle().await;
        }
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &Url) -> Result<bool, ServiceWorkerError> {
        let removed = self.registrations.write().await.remove(scope.as_str());
        let Some(mut registration) = removed else {
            return Ok(false);
        };

        let workers = registration.unregister();
        {
            let mut runtimes = self.runtimes.write().await;
            for id in &workers {
                runtimes.remove(id);
            }
        }
        self.clients.write().await.release(&workers);
        info!(scope = %scope, "Unregistered service worker");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use http::{HeaderMap, StatusCode};
    use trakker_net::NetError;

    use crate::cache::CacheStorage;

    /// Serves every URL with its path as the body.
    #[derive(Default)]
    struct CountingOrigin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingOrigin {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = request.url.path().to_string();
            Ok(Response::new(request.url, StatusCode::OK, HeaderMap::new(), body))
        }
    }

    async fn registered(origin: &Arc<CountingOrigin>) -> ServiceWorkerContainer {
        let (container, _events) =
            ServiceWorkerContainer::new(origin.clone(), Arc::new(CacheStorage::new()));
        container
            .register(
                "https://example.com/service-worker.js",
                RegistrationOptions::default(),
                SwConfig::default(),
            )
            .await
            .unwrap();
        container
    }

    #[tokio::test]
    async fn test_fetch_waits_for_activation() {
        let origin = Arc::new(CountingOrigin::default());
        let container = registered(&origin).await;
        let before = origin.calls.load(Ordering::SeqCst);
        let request = Request::get(Url::parse("https://example.com/css/styles.css").unwrap());

        {
            let _activating = container.activation.write().await;
            let pending = tokio::time::timeout(
                Duration::from_millis(50),
                container.fetch(request.clone(), None),
            )
            .await;
            assert!(pending.is_err());
        }

        let response = container.fetch(request, None).await.unwrap();
        assert_eq!(response.body().as_ref(), b"/css/styles.css");
        assert_eq!(origin.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_page_opened_after_activation_is_controlled() {
        let origin = Arc::new(CountingOrigin::default());
        let container = registered(&origin).await;
        let scope = Url::parse("https://example.com/").unwrap();
        let active = container.active_worker(&scope).await.unwrap();

        let page = container
            .open_client(Url::parse("https://example.com/index.html").unwrap())
            .await;
        assert_eq!(page.controller, Some(active.id));

        let closed = container.close_client(&page.id).await.unwrap();
        assert_eq!(closed.id, page.id);
        assert!(container.clients.read().await.get(&page.id).is_none());
    }

    #[tokio::test]
    async fn test_page_outside_scope_is_uncontrolled() {
        let origin = Arc::new(CountingOrigin::default());
        let (container, _events) =
            ServiceWorkerContainer::new(origin.clone(), Arc::new(CacheStorage::new()));
        container
            .register(
                "https://example.com/app/service-worker.js",
                RegistrationOptions::default(),
                SwConfig::default(),
            )
            .await
            .unwrap();

        let page = container
            .open_client(Url::parse("https://example.com/other/").unwrap())
            .await;
        assert!(page.controller.is_none());
    }

    #[test]
    fn test_default_scope_is_script_directory() {
        let script = Url::parse("https://example.com/trakker/service-worker.js").unwrap();
        let scope = ServiceWorkerContainer::resolve_scope(&script, None).unwrap();
        assert_eq!(scope.as_str(), "https://example.com/trakker/");
    }

    #[test]
    fn test_insecure_origin_rejected() {
        let script = Url::parse("http://example.com/service-worker.js").unwrap();
        assert!(matches!(
            ServiceWorkerContainer::resolve_scope(&script, None),
            Err(ServiceWorkerError::SecurityError(_))
        ));
    }

    #[test]
    fn test_localhost_allowed_over_http() {
        let script = Url::parse("http://localhost:8080/service-worker.js").unwrap();
        assert!(ServiceWorkerContainer::resolve_scope(&script, None).is_ok());
    }

    #[test]
    fn test_scope_wider_than_script_rejected() {
        let script = Url::parse("https://example.com/trakker/js/sw.js").unwrap();
        assert!(matches!(
            ServiceWorkerContainer::resolve_scope(&script, Some("/trakker/")),
            Err(ServiceWorkerError::SecurityError(_))
        ));
    }

    #[test]
    fn test_cross_origin_scope_rejected() {
        let script = Url::parse("https://example.com/sw.js").unwrap();
        assert!(matches!(
            ServiceWorkerContainer::resolve_scope(&script, Some("https://evil.example/")),
            Err(ServiceWorkerError::SecurityError(_))
        ));
    }
}
