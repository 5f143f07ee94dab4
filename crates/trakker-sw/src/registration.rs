//! Service worker instances and the per-scope registration state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Cache generation this worker owns.
    pub cache_name: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url, cache_name: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            cache_name: cache_name.into(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = %self.id, from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active and able to receive fetch events.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last update time.
    pub last_update: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Whether any worker is installed or active.
    pub fn has_worker(&self) -> bool {
        self.installing.is_some() || self.waiting.is_some() || self.active.is_some()
    }

    /// Start installing a new worker, replacing any in-flight install.
    pub fn update(&mut self, mut worker: ServiceWorker) -> ServiceWorkerId {
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        self.last_update = Some(Instant::now());
        id
    }

    /// Transition installing to waiting.
    ///
    /// A worker already waiting is superseded by the newly installed one.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<(), ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut superseded) = self.waiting.replace(worker) {
            superseded.set_state(ServiceWorkerState::Redundant);
        }
        Ok(())
    }

    /// Mark the installing worker redundant. The active worker is untouched.
    pub fn install_failed(
        &mut self,
        id: ServiceWorkerId,
        error: &ServiceWorkerError,
    ) -> Result<ServiceWorker, ServiceWorkerError> {
        let mut worker = self.take_installing(id)?;
        worker.error = Some(error.to_string());
        worker.set_state(ServiceWorkerState::Redundant);
        Ok(worker)
    }

    /// Move the waiting worker into the active slot as `Activating`.
    ///
    /// The previous active worker becomes redundant.
    pub fn begin_activate(&mut self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }

        let id = worker.id;
        self.active = Some(worker);
        Ok(id)
    }

    /// Finish activation of the active worker.
    pub fn finish_activate(&mut self, id: ServiceWorkerId) -> Result<(), ServiceWorkerError> {
        match self.active.as_mut() {
            Some(worker) if worker.id == id && worker.state == ServiceWorkerState::Activating => {
                worker.set_state(ServiceWorkerState::Activated);
                Ok(())
            }
            _ => Err(ServiceWorkerError::StateError(format!(
                "worker {id} is not activating"
            ))),
        }
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) -> Vec<ServiceWorkerId> {
        [self.active.take(), self.waiting.take(), self.installing.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker.id
            })
            .collect()
    }

    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker, ServiceWorkerError> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(ServiceWorkerError::StateError(format!(
                    "worker {id} is no longer installing"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(version: &str) -> ServiceWorker {
        let url = Url::parse("https://example.com/service-worker.js").unwrap();
        ServiceWorker::new(url, format!("trakkertime-cache-{version}"))
    }

    fn registration() -> ServiceWorkerRegistration {
        ServiceWorkerRegistration::new(Url::parse("https://example.com/").unwrap())
    }

    #[test]
    fn test_service_worker_creation() {
        let worker = worker("v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);
        assert_eq!(worker.cache_name, "trakkertime-cache-v1");
        assert!(!worker.is_active());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = registration();
        assert!(!registration.has_worker());

        let id = registration.update(worker("v1"));
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            ServiceWorkerState::Installing
        );

        registration.install_complete(id).unwrap();
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().unwrap().state,
            ServiceWorkerState::Installed
        );

        assert_eq!(registration.begin_activate().unwrap(), id);
        assert_eq!(
            registration.active.as_ref().unwrap().state,
            ServiceWorkerState::Activating
        );

        registration.finish_activate(id).unwrap();
        assert!(registration.get_active().unwrap().is_active());
    }

    #[test]
    fn test_failed_install_keeps_active() {
        let mut registration = registration();
        let v1 = registration.update(worker("v1"));
        registration.install_complete(v1).unwrap();
        registration.begin_activate().unwrap();
        registration.finish_activate(v1).unwrap();

        let v2 = registration.update(worker("v2"));
        let failed = registration
            .install_failed(v2, &ServiceWorkerError::InstallFailed("icon missing".into()))
            .unwrap();

        assert!(failed.is_redundant());
        assert!(failed.error.unwrap().contains("icon missing"));
        assert_eq!(registration.get_active().unwrap().id, v1);
        assert!(registration.get_active().unwrap().is_active());
    }

    #[test]
    fn test_stale_install_id_rejected() {
        let mut registration = registration();
        let first = registration.update(worker("v1"));
        let second = registration.update(worker("v2"));

        assert!(registration.install_complete(first).is_err());
        assert_eq!(registration.installing.as_ref().unwrap().id, second);
    }

    #[test]
    fn test_activate_without_waiting_is_state_error() {
        let mut registration = registration();
        assert!(matches!(
            registration.begin_activate(),
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[test]
    fn test_unregister() {
        let mut registration = registration();
        let id = registration.update(worker("v1"));
        registration.install_complete(id).unwrap();

        let removed = registration.unregister();
        assert_eq!(removed, vec![id]);
        assert!(!registration.has_worker());
    }
}
