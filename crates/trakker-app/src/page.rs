//! The timer page: form, status line and submit flow.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;
use trakker_net::{Fetcher, NetError, Origin, Request, Response};
use trakker_sw::ServiceWorkerContainer;

use crate::form::{StatusKind, StatusLine, TimerForm};
use crate::timer::{TimerClient, TimerStarted};

const STARTING_MESSAGE: &str = "Starting timer…";

/// Fetches on behalf of one page, through its service worker container.
pub struct PageFetcher {
    container: Arc<ServiceWorkerContainer>,
    client_id: Option<String>,
    origin: Option<Origin>,
}

impl PageFetcher {
    pub fn new(container: Arc<ServiceWorkerContainer>) -> Self {
        Self {
            container,
            client_id: None,
            origin: None,
        }
    }

    /// Issue requests as the given open page.
    pub fn for_client(mut self, client_id: impl Into<String>, origin: Origin) -> Self {
        self.client_id = Some(client_id.into());
        self.origin = Some(origin);
        self
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let request = match &self.origin {
            Some(origin) => request.from_client(origin.clone()),
            None => request,
        };
        self.container
            .fetch(request, self.client_id.as_deref())
            .await
            .map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The timer page.
pub struct TimerPage {
    pub form: TimerForm,
    status: StatusLine,
    busy: bool,
    client: TimerClient,
}

impl TimerPage {
    pub fn new(client: TimerClient) -> Self {
        Self {
            form: TimerForm::new(),
            status: StatusLine::default(),
            busy: false,
            client,
        }
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    /// Whether the start button is disabled.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Submit the form.
    ///
    /// Invalid input stops before any request. On success the form is
    /// reset. Every outcome ends up on the status line.
    pub async fn submit(&mut self) -> Option<TimerStarted> {
        self.status.clear();

        let payload = self.form.serialize();
        if let Some(message) = payload.validate() {
            self.status.set(message, StatusKind::Error);
            return None;
        }

        self.busy = true;
        self.status.set(STARTING_MESSAGE, StatusKind::Info);

        let started = match self.client.start(&payload).await {
            Ok(started) => {
                self.status.set(started.message(), StatusKind::Success);
                self.form.reset();
                Some(started)
            }
            Err(e) => {
                error!(error = %e, "Timer start failed");
                self.status.set(e.to_string(), StatusKind::Error);
                None
            }
        };

        self.busy = false;
        started
    }
}
