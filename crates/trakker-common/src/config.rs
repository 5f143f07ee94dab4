//! JSON configuration loading.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::TrakkerError;

/// Load a JSON config file.
///
/// A missing file yields `T::default()`. A file that exists but does not
/// parse is an error; a half-applied config is worse than none.
pub async fn load_json_config<T>(path: &Path) -> crate::Result<T>
where
    T: DeserializeOwned + Default,
{
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };

    let config = serde_json::from_str(&contents).map_err(|e| {
        TrakkerError::config_with_source(format!("invalid config {}", path.display()), e)
    })?;
    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        retries: u32,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                retries: 3,
            }
        }
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Sample = load_json_config(&dir.path().join("nope.json"))
            .await
            .unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "name": "custom" }"#).unwrap();

        let loaded: Sample = load_json_config(&path).await.unwrap();
        assert_eq!(loaded.name, "custom");
        assert_eq!(loaded.retries, 3);
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_json_config::<Sample>(&path).await.unwrap_err();
        assert!(matches!(err, TrakkerError::Config { source: Some(_), .. }));
    }
}
