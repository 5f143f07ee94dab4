//! Event dispatch: install, activate and fetch handlers keyed by event kind.
//!
//! Each handler returns a future that the container awaits before moving the
//! worker on. Install and activate are extendable: their futures are bounded
//! by the worker's configured lifetime.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use hashbrown::HashMap;
use tracing::{debug, Instrument};
use trakker_common::{with_timeout, TrakkerError};
use trakker_net::Response;

use crate::generations::GenerationManager;
use crate::interceptor::{FetchEvent, FetchInterceptor};
use crate::precache::PrecacheManager;
use crate::scope::WorkerGlobalScope;
use crate::ServiceWorkerError;

/// Kinds of events a worker handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
}

/// An event delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
        }
    }
}

/// Result of handling an event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Extendable work finished.
    Done,
    /// Fetch answered by the worker.
    Respond(Response),
    /// Fetch not intercepted; the request goes to the network untouched.
    Passthrough,
}

/// A handler for one event kind.
pub type EventHandler = Arc<
    dyn Fn(WorkerEvent) -> BoxFuture<'static, Result<EventOutcome, ServiceWorkerError>>
        + Send
        + Sync,
>;

/// Handlers keyed by event kind.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, EventHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(WorkerEvent) -> BoxFuture<'static, Result<EventOutcome, ServiceWorkerError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Whether a handler is registered for `kind`.
    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Dispatch an event. Without a handler, extendable events complete
    /// immediately and fetches pass through.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                let span = tracing::debug_span!("sw_event", ?kind);
                handler(event).instrument(span).await
            }
            None => {
                debug!(?kind, "No handler registered");
                Ok(match kind {
                    EventKind::Fetch => EventOutcome::Passthrough,
                    EventKind::Install | EventKind::Activate => EventOutcome::Done,
                })
            }
        }
    }

    /// Dispatch an extendable event, failing if it does not settle within
    /// `lifetime`.
    pub async fn dispatch_extendable(
        &self,
        event: WorkerEvent,
        lifetime: Duration,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        match with_timeout(lifetime, || self.dispatch(event)).await {
            Ok(outcome) => outcome,
            Err(TrakkerError::Timeout(d)) => Err(ServiceWorkerError::Timeout(d)),
            Err(other) => Err(ServiceWorkerError::StateError(other.to_string())),
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Handlers for the offline shell worker.
///
/// - install: precache the manifest, then skip waiting
/// - activate: purge stale generations, claim clients
/// - fetch: cache-first with write-through and offline fallback
pub fn offline_shell(scope: Arc<WorkerGlobalScope>) -> HandlerTable {
    let mut table = HandlerTable::new();

    let install_scope = Arc::clone(&scope);
    table.on(EventKind::Install, move |_| {
        let scope = Arc::clone(&install_scope);
        Box::pin(async move {
            PrecacheManager::new(&scope).precache().await?;
            scope.skip_waiting();
            Ok(EventOutcome::Done)
        })
    });

    let activate_scope = Arc::clone(&scope);
    table.on(EventKind::Activate, move |_| {
        let scope = Arc::clone(&activate_scope);
        Box::pin(async move {
            GenerationManager::new(&scope).activate().await;
            Ok(EventOutcome::Done)
        })
    });

    let interceptor = Arc::new(FetchInterceptor::new(scope));
    table.on(EventKind::Fetch, move |event| {
        let interceptor = Arc::clone(&interceptor);
        Box::pin(async move {
            match event {
                WorkerEvent::Fetch(fetch) => interceptor.handle(fetch).await,
                other => Err(ServiceWorkerError::StateError(format!(
                    "fetch handler got {:?}",
                    other.kind()
                ))),
            }
        })
    });

    table
}
