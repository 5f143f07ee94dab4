//! Clients API: the pages a worker controls.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::registration::ServiceWorkerId;

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker controlling this page, if any.
    pub controller: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a page, controlled by `controller` if given.
    pub fn open(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            id: id.clone(),
            url,
            controller,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Close a page.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients whose URL falls under `scope`.
    pub fn in_scope<'a>(&'a self, scope: &'a Url) -> impl Iterator<Item = &'a Client> + 'a {
        self.clients
            .values()
            .filter(move |c| c.url.as_str().starts_with(scope.as_str()))
    }

    /// Clients controlled by `worker`.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Make `worker` the controller of every page under `scope`.
    ///
    /// Returns the number of pages claimed.
    pub fn claim(&mut self, scope: &Url, worker: ServiceWorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.as_str().starts_with(scope.as_str()) && client.controller != Some(worker)
            {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        debug!(scope = %scope, %worker, claimed, "Clients claimed");
        claimed
    }

    /// Drop control by any of `workers` (they became redundant).
    pub fn release(&mut self, workers: &[ServiceWorkerId]) {
        for client in self.clients.values_mut() {
            if client.controller.is_some_and(|c| workers.contains(&c)) {
                client.controller = None;
            }
        }
    }
}
