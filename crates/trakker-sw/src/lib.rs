//! # Trakker Service Worker
//!
//! The offline shell for the Trakker time-tracking page: a service worker
//! that precaches the page shell on install, rotates cache generations on
//! activate and answers fetches cache-first with an offline fallback.
//!
//! ## Features
//!
//! - **Registration**: secure-context checks, scope resolution, lifecycle
//! - **Precache**: all-or-nothing population of the current generation
//! - **Generations**: stale caches purged on activation, clients claimed
//! - **Fetch Interception**: cache-first, write-through, offline fallback
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     ├── ServiceWorkerRegistration (per scope)
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── scope
//!     │
//!     ├── WorkerGlobalScope (per worker) ── HandlerTable
//!     │       install  → PrecacheManager
//!     │       activate → GenerationManager
//!     │       fetch    → FetchInterceptor
//!     │
//!     ├── CacheStorage (caches)
//!     │       └── Cache → Request → Response
//!     │
//!     └── Clients
//! ```

use std::time::Duration;

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod generations;
pub mod interceptor;
pub mod lifecycle;
pub mod precache;
pub mod registration;
pub mod scope;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, Clients};
pub use config::SwConfig;
pub use container::{RegistrationOptions, ServiceWorkerContainer, ServiceWorkerEvent};
pub use generations::{ActivationReport, GenerationManager};
pub use interceptor::{FetchEvent, FetchInterceptor};
pub use lifecycle::{EventKind, EventOutcome, HandlerTable, WorkerEvent};
pub use precache::PrecacheManager;
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use scope::WorkerGlobalScope;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Quota exceeded: needed {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Event not settled within {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),
}
