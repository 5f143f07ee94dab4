//! Registering the offline shell from the page.

use tracing::{info, warn};
use trakker_sw::{RegistrationOptions, ServiceWorkerContainer, SwConfig};
use url::Url;

use crate::AppError;

const SCRIPT_NAME: &str = "service-worker.js";

/// Script URLs to try, in order: next to the page, then at the origin root.
pub fn script_candidates(page_url: &Url) -> Vec<Url> {
    let mut candidates = Vec::with_capacity(2);
    if let Ok(url) = page_url.join(SCRIPT_NAME) {
        candidates.push(url);
    }
    if let Ok(url) = page_url.join(&format!("/{SCRIPT_NAME}")) {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }
    candidates
}

/// Register the offline shell for the page at `page_url`.
///
/// Returns the registration scope. If every candidate fails, the last
/// error is returned.
pub async fn register_shell(
    container: &ServiceWorkerContainer,
    page_url: &Url,
    config: &SwConfig,
) -> Result<Url, AppError> {
    let mut last_error = None;
    for script in script_candidates(page_url) {
        match container
            .register(script.as_str(), RegistrationOptions::default(), config.clone())
            .await
        {
            Ok(scope) => {
                info!(script = %script, scope = %scope, "Service worker registered");
                return Ok(scope);
            }
            Err(e) => {
                warn!(script = %script, error = %e, "Service worker registration failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => e.into(),
        None => AppError::InvalidInput(format!("no service worker script for {page_url}")),
    })
}
