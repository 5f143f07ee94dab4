//! Network fetcher backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{CredentialsMode, NetError, Request, RequestMode, Response, ResponseType};

/// Something that can perform a network fetch.
///
/// Resolves with a [`Response`] for any HTTP status; only transport
/// failures (DNS, refused connection, timeout) are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Keep a cookie jar for credentialed requests.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Trakker/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Live network access.
pub struct HttpLoader {
    client: Client,
    /// Client without a cookie jar, for requests that must not send credentials.
    anonymous: Client,
    config: LoaderConfig,
}

impl HttpLoader {
    /// Create a new loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let build = |cookies: bool| {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.default_timeout)
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
                .cookie_store(cookies)
                .build()
                .map_err(|e| NetError::RequestFailed(e.to_string()))
        };
        let client = build(config.cookies_enabled)?;
        let anonymous = build(false)?;

        info!(user_agent = %config.user_agent, "HttpLoader initialized");

        Ok(Self {
            client,
            anonymous,
            config,
        })
    }

    fn response_type(request: &Request) -> ResponseType {
        if !request.is_cross_origin() {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        if request.mode == RequestMode::SameOrigin && request.is_cross_origin() {
            return Err(NetError::RequestFailed(format!(
                "same-origin request to cross-origin URL {}",
                request.url
            )));
        }

        let sends_cookies = match request.credentials {
            CredentialsMode::Omit => false,
            CredentialsMode::SameOrigin => !request.is_cross_origin(),
            CredentialsMode::Include => true,
        };
        let client = if sends_cookies {
            &self.client
        } else {
            &self.anonymous
        };

        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref origin) = request.client_origin {
            if request.is_cross_origin() {
                req_builder = req_builder.header("Origin", origin.serialize());
            }
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or(self.config.default_timeout))
            } else {
                NetError::HttpError(e)
            }
        })?;

        let response_type = Self::response_type(&request);
        if response_type == ResponseType::Opaque {
            trace!(url = %request.url, "Opaque response");
            return Ok(Response::opaque(request.url));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(url, status, headers, body).with_type(response_type);
        response.request_id = request.id;
        Ok(response)
    }
}
