//! Application configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use trakker_common::{load_json_config, LogFormat};
use trakker_sw::SwConfig;
use url::Url;

use crate::{parse_url, AppError};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the page is served from.
    pub page_url: String,

    /// Timer API start endpoint.
    pub timer_endpoint: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Log filter directives, `RUST_LOG` syntax.
    pub log_filter: Option<String>,

    /// Offline shell settings.
    pub service_worker: SwConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page_url: "https://localhost:7233/".to_string(),
            timer_endpoint: "https://localhost:7233/timer/start".to_string(),
            log_format: LogFormat::default(),
            log_filter: None,
            service_worker: SwConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file; a missing file gives the defaults.
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let config: Self = load_json_config(path).await?;
        config.page_url()?;
        config.timer_endpoint()?;
        Ok(config)
    }

    pub fn page_url(&self) -> Result<Url, AppError> {
        parse_url(&self.page_url)
    }

    pub fn timer_endpoint(&self) -> Result<Url, AppError> {
        parse_url(&self.timer_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(
            config.timer_endpoint().unwrap().as_str(),
            "https://localhost:7233/timer/start"
        );
        assert_eq!(config.service_worker.cache_name(), "trakkertime-cache-v2");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"timer_endpoint": "https://api.example.com/timer/start", "service_worker": {{"version": "v3"}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(config.timer_endpoint, "https://api.example.com/timer/start");
        assert_eq!(config.service_worker.cache_name(), "trakkertime-cache-v3");
        assert_eq!(config.page_url, AppConfig::default().page_url);
    }

    #[tokio::test]
    async fn test_bad_endpoint_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timer_endpoint": "timer/start"}}"#).unwrap();

        assert!(matches!(
            AppConfig::load(file.path()).await,
            Err(AppError::InvalidUrl { .. })
        ));
    }
}
