//! Timer API client.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use trakker_net::{CredentialsMode, Fetcher, Request};
use url::Url;

use crate::form::TimerPayload;
use crate::AppError;

/// Shown when the API rejects a start without saying why.
pub const DEFAULT_REJECTION: &str =
    "Unable to start the timer. Please review the form and try again.";

/// A started timer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStarted {
    /// Entry id, whatever shape the API uses.
    pub id: serde_json::Value,
    pub start_time_utc: Option<DateTime<Utc>>,
}

impl TimerStarted {
    /// Status message for a successful start. A missing start time means
    /// "now".
    pub fn message(&self) -> String {
        let started = self.start_time_utc.unwrap_or_else(Utc::now);
        let id = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!(
            "Timer started at {}. Entry id: {id}.",
            started.with_timezone(&Local).format("%-m/%-d/%Y, %-I:%M:%S %p")
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Posts timer starts to the Timer API.
pub struct TimerClient {
    endpoint: Url,
    fetcher: Arc<dyn Fetcher>,
}

impl TimerClient {
    pub fn new(endpoint: Url, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { endpoint, fetcher }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Start a timer.
    ///
    /// A non-2xx response becomes [`AppError::TimerRejected`] carrying the
    /// body's `error` field, or a generic message when there is none.
    pub async fn start(&self, payload: &TimerPayload) -> Result<TimerStarted, AppError> {
        let request = Request::post_json(self.endpoint.clone(), payload)?
            .credentials(CredentialsMode::Include);
        debug!(endpoint = %self.endpoint, "Starting timer");

        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            let message = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|body| body.error)
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
            warn!(status = response.status, %message, "Timer start rejected");
            return Err(AppError::TimerRejected(message));
        }

        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{BillingStatus, TimerForm};
    use serde_json::json;
    use trakker_net::{HttpLoader, LoaderConfig};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> TimerClient {
        let endpoint = Url::parse(&format!("{}/timer/start", server.uri())).unwrap();
        let loader = HttpLoader::new(LoaderConfig::default()).unwrap();
        TimerClient::new(endpoint, Arc::new(loader))
    }

    fn billable_payload() -> TimerPayload {
        let mut form = TimerForm::new();
        form.set_billing_status(Some(BillingStatus::Billable));
        form.set_billing_rate("95");
        form.set_field("description", "Design review");
        form.serialize()
    }

    #[tokio::test]
    async fn test_start_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/timer/start"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "billingStatus": "Billable",
                "billingRate": 95.0,
                "description": "Design review",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42,
                "startTimeUtc": "2024-03-01T09:30:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let started = client(&server).await.start(&billable_payload()).await.unwrap();
        assert_eq!(started.id, json!(42));
        assert!(started.start_time_utc.is_some());
        assert!(started.message().starts_with("Timer started at "));
        assert!(started.message().ends_with(". Entry id: 42."));
    }

    #[tokio::test]
    async fn test_rejection_uses_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "Project is archived." })),
            )
            .mount(&server)
            .await;

        let err = client(&server).await.start(&billable_payload()).await.unwrap_err();
        assert_eq!(err.to_string(), "Project is archived.");
    }

    #[tokio::test]
    async fn test_rejection_without_body_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server).await.start(&billable_payload()).await.unwrap_err();
        assert!(matches!(err, AppError::TimerRejected(ref m) if m == DEFAULT_REJECTION));
    }

    #[test]
    fn test_message_with_string_id() {
        let started = TimerStarted {
            id: json!("e-17"),
            start_time_utc: None,
        };
        assert!(started.message().ends_with("Entry id: e-17."));
    }
}
