//! Runtime configuration for the resilience layer.
//!
//! `ResilienceConfig` is read from a JSON file, then selected values are
//! overridden from the environment. Loading `.env` files is left to the
//! binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::MediaPolicy;
use crate::models::CameraField;
use crate::queue::QueuePolicy;
use crate::reconcile::ReconcileSchema;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_API_BASE_URL: &str = "WATCHPOST_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "WATCHPOST_API_TOKEN";
pub const ENV_DATA_DIR: &str = "WATCHPOST_DATA_DIR";

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Backend the queue replays mutations against
    pub api_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Directory holding the queue database
    pub data_dir: Option<PathBuf>,
    pub request_timeout_ms: u64,
    pub flush_interval_ms: u64,
    pub queue: QueuePolicy,
    pub media: MediaPolicy,
    /// Overrides the default critical reconciliation fields
    pub critical_fields: Option<Vec<CameraField>>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            data_dir: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            queue: QueuePolicy::default(),
            media: MediaPolicy::default(),
            critical_fields: None,
        }
    }
}

impl ResilienceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validated()
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json_str(&raw),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Load `path` and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        Self::load(path)?
            .with_overrides(|key| std::env::var(key).ok())
            .validated()
    }

    /// Apply overrides from a variable lookup; blank values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(dir) = normalize_text_option(lookup(ENV_DATA_DIR)) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validated(mut self) -> Result<Self> {
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(Error::Config(
                    "apiBaseUrl must include http:// or https://".to_string(),
                ))
            }
            None => None,
        };
        self.api_token = normalize_text_option(self.api_token.take());
        if self.flush_interval_ms == 0 {
            return Err(Error::Config("flushIntervalMs must be positive".to_string()));
        }
        if self.queue.max_retries == 0 {
            return Err(Error::Config("queue.maxRetries must be positive".to_string()));
        }
        if matches!(&self.critical_fields, Some(fields) if fields.is_empty()) {
            return Err(Error::Config(
                "criticalFields must name at least one field".to_string(),
            ));
        }
        Ok(self)
    }

    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconcile_schema(&self) -> ReconcileSchema {
        self.critical_fields
            .clone()
            .map_or_else(ReconcileSchema::default, ReconcileSchema::new)
    }

    /// Path of the libSQL queue database inside `data_dir`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("watchpost.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ResilienceConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.media.backoff, RetryPolicy::new(1_000, 30_000));
    }

    #[test]
    fn partial_nested_policies_keep_other_defaults() {
        let config = ResilienceConfig::from_json_str(
            r#"{
              "apiBaseUrl": " https://api.example.com/ ",
              "queue": { "maxRetries": 3 },
              "media": { "backoff": { "baseDelayMs": 500 } },
              "criticalFields": ["status", "isRecording"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.backoff, RetryPolicy::new(1_000, 30_000));
        assert_eq!(config.media.backoff, RetryPolicy::new(500, 30_000));
        assert_eq!(config.media.max_attempts, 5);
        assert_eq!(
            config.reconcile_schema().critical_fields(),
            &[CameraField::Status, CameraField::IsRecording]
        );
    }

    #[test]
    fn rejects_unknown_fields_and_bad_urls() {
        let error = ResilienceConfig::from_json_str(r#"{"flushEvery": 5}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));

        let error = ResilienceConfig::from_json_str(r#"{"apiBaseUrl": "api.example.com"}"#)
            .unwrap_err();
        assert!(error.to_string().contains("http://"));

        assert!(ResilienceConfig::from_json_str(r#"{"criticalFields": []}"#).is_err());
        assert!(ResilienceConfig::from_json_str(r#"{"flushIntervalMs": 0}"#).is_err());
    }

    #[test]
    fn rejects_unknown_nested_policy_fields() {
        let error =
            ResilienceConfig::from_json_str(r#"{"queue": {"maxRetry": 3}}"#).unwrap_err();
        assert!(error.to_string().contains("maxRetry"));

        let error = ResilienceConfig::from_json_str(r#"{"media": {"maxAttempt": 2}}"#)
            .unwrap_err();
        assert!(error.to_string().contains("unknown field"));

        let error = ResilienceConfig::from_json_str(
            r#"{"media": {"backoff": {"baseDelay": 500}}}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("baseDelay"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE_URL, "https://override.example.com"),
            (ENV_API_TOKEN, "  "),
            (ENV_DATA_DIR, "/var/lib/watchpost"),
        ]);
        let base = ResilienceConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            api_token: Some("file-token".to_string()),
            ..ResilienceConfig::default()
        };

        let config = base.with_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://override.example.com")
        );
        assert_eq!(config.api_token.as_deref(), Some("file-token"));
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/var/lib/watchpost/watchpost.db"))
        );
    }

    #[test]
    fn load_reads_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ResilienceConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(missing, ResilienceConfig::default());

        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"flushIntervalMs": 5000}"#).unwrap();
        let config = ResilienceConfig::load(&path).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
    }

    #[test]
    fn token_is_not_serialized() {
        let config = ResilienceConfig {
            api_token: Some("secret".to_string()),
            ..ResilienceConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
