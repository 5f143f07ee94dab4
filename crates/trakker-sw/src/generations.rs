//! Activation-time cache generation rotation.

use tracing::{info, warn};

use crate::scope::WorkerGlobalScope;

/// What an activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations that could not be removed.
    pub failed: Vec<String>,
    /// Pages newly placed under this worker's control.
    pub claimed: usize,
}

/// Purges stale generations and claims clients.
pub struct GenerationManager<'a> {
    scope: &'a WorkerGlobalScope,
}

impl<'a> GenerationManager<'a> {
    pub fn new(scope: &'a WorkerGlobalScope) -> Self {
        Self { scope }
    }

    /// Delete every generation not named after the current version, then
    /// claim all pages in scope.
    ///
    /// A generation that cannot be deleted is logged and left behind; only
    /// the current generation is ever read, so a leftover is a storage leak
    /// until the next deploy, never a wrong answer.
    pub async fn activate(&self) -> ActivationReport {
        let scope = self.scope;
        let current = scope.cache_name();
        let mut report = ActivationReport::default();

        for name in scope.caches.keys().await {
            if name == current {
                continue;
            }
            if scope.caches.delete(&name).await {
                info!(cache = %name, "Deleted stale cache generation");
                report.deleted.push(name);
            } else {
                warn!(cache = %name, "Stale cache generation could not be deleted");
                report.failed.push(name);
            }
        }

        report.claimed = scope
            .clients
            .write()
            .await
            .claim(&scope.scope, scope.worker_id);

        info!(
            cache = %current,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Activation complete"
        );
        report
    }
}
