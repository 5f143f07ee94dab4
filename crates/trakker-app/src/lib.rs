//! # TrakkerTime page
//!
//! The page side of the time-tracking client: the timer form, its status
//! line, the Timer API client, the install prompt and service worker
//! registration. Page requests are routed through the service worker
//! container, so the offline shell sees every fetch the page makes.

use thiserror::Error;
use trakker_common::TrakkerError;
use trakker_net::NetError;
use trakker_sw::ServiceWorkerError;

pub mod config;
pub mod form;
pub mod install_prompt;
pub mod page;
pub mod register;
pub mod timer;

pub use config::AppConfig;
pub use form::{BillingStatus, StatusKind, StatusLine, TimerForm, TimerPayload};
pub use install_prompt::{DeferredPrompt, InstallPrompt, PromptOutcome};
pub use page::{PageFetcher, TimerPage};
pub use register::{register_shell, script_candidates};
pub use timer::{TimerClient, TimerStarted};

/// Errors surfaced by the page.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Worker(#[from] ServiceWorkerError),

    #[error(transparent)]
    Common(#[from] TrakkerError),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The Timer API refused the request; the message is shown verbatim.
    #[error("{0}")]
    TimerRejected(String),
}

impl AppError {
    pub(crate) fn invalid_url(url: &str, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            source,
        }
    }
}

/// Parse a URL, keeping the offending text in the error.
pub(crate) fn parse_url(url: &str) -> Result<url::Url, AppError> {
    url::Url::parse(url).map_err(|e| AppError::invalid_url(url, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_displays_server_message() {
        let err = AppError::TimerRejected("Project is archived.".into());
        assert_eq!(err.to_string(), "Project is archived.");
    }

    #[test]
    fn test_invalid_url_keeps_input() {
        let err = parse_url("not a url").unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }
}
