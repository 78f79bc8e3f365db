//! Configuration management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::StatsError;
use crate::jobs::{BackoffStrategy, CronSchedule, RetryPolicy};
use crate::observability::ObservabilityConfig;
use crate::stats::AggregatorConfig;
use crate::store::{FirestoreConfig, DEFAULT_METADATA_ENDPOINT};

/// Environment variable prefix, e.g. `OURARCHIVE_STATS__SERVER__PORT`.
pub const ENV_PREFIX: &str = "OURARCHIVE_STATS";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Daily trigger configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Aggregation tuning
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which [`DocumentStore`](crate::store::DocumentStore) implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firestore,
    /// Process-local store, empty at startup
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Google Cloud project id (required for Firestore)
    pub project_id: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    /// Firestore REST endpoint, or an emulator address
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Fixed OAuth bearer token. It is not refreshed, so a long-running
    /// `serve` should use `metadata_credentials` instead.
    pub access_token: Option<String>,

    /// Fetch and refresh tokens from the GCE metadata server
    #[serde(default)]
    pub metadata_credentials: bool,

    #[serde(default = "default_metadata_endpoint")]
    pub metadata_endpoint: String,

    /// Documents requested per list page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            project_id: None,
            database: default_database(),
            endpoint: default_endpoint(),
            access_token: None,
            metadata_credentials: false,
            metadata_endpoint: default_metadata_endpoint(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Firestore client settings derived from this section.
    pub fn firestore_config(&self) -> Result<FirestoreConfig, StatsError> {
        let project_id = self
            .project_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| StatsError::configuration("store.project_id is required for the firestore backend"))?;

        let mut config = FirestoreConfig::new(project_id)
            .with_endpoint(&self.endpoint)
            .with_page_size(self.page_size);
        config.database = self.database.clone();
        config.timeout = Duration::from_secs(self.timeout_secs);
        if self.metadata_credentials {
            config = config.with_metadata_credentials(&self.metadata_endpoint);
        } else if let Some(token) = &self.access_token {
            config = config.with_access_token(token);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Run the daily aggregation inside `serve`
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Daily cron expression, evaluated in UTC
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Retries after a failed scheduled run
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; later retries back off exponentially
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            cron: default_cron(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.max_retries)
            .with_backoff(BackoffStrategy::exponential(self.retry_delay_secs))
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_database() -> String { "(default)".to_string() }
fn default_endpoint() -> String { "https://firestore.googleapis.com".to_string() }
fn default_metadata_endpoint() -> String { DEFAULT_METADATA_ENDPOINT.to_string() }
fn default_page_size() -> u32 { 300 }
fn default_timeout_secs() -> u64 { 30 }
fn default_scheduler_enabled() -> bool { true }
fn default_cron() -> String { "0 0 * * *".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_secs() -> u64 { 30 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::build(None, environment())
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::build(Some(path.as_ref()), environment())
    }

    fn build(path: Option<&Path>, environment: config::Environment) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder.add_source(environment).build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), StatsError> {
        if self.store.backend == StoreBackend::Firestore {
            self.store.firestore_config()?;
        }
        if self.store.page_size == 0 {
            return Err(StatsError::configuration("store.page_size must be positive"));
        }
        if self.scheduler.enabled {
            CronSchedule::parse(&self.scheduler.cron)
                .map_err(|e| StatsError::configuration(e.to_string()))?;
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Credentials;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(cfg.store.backend, StoreBackend::Firestore);
        assert_eq!(cfg.store.database, "(default)");
        assert_eq!(cfg.store.page_size, 300);
        assert_eq!(cfg.scheduler.cron, "0 0 * * *");
        assert_eq!(cfg.scheduler.retry_policy().max_attempts, 3);
        assert_eq!(cfg.aggregator.household_concurrency, 8);
        assert!(cfg.observability.json_logging);
    }

    #[test]
    fn test_firestore_requires_project_id() {
        let err = Config::build(None, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("project_id"));
    }

    #[test]
    fn test_environment_overrides() {
        let cfg = Config::build(
            None,
            env_from(&[
                ("OURARCHIVE_STATS__STORE__BACKEND", "memory"),
                ("OURARCHIVE_STATS__SERVER__PORT", "9090"),
                ("OURARCHIVE_STATS__SCHEDULER__ENABLED", "false"),
                ("OURARCHIVE_STATS__AGGREGATOR__HOUSEHOLD_CONCURRENCY", "2"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.server.port, 9090);
        assert!(!cfg.scheduler.enabled);
        assert_eq!(cfg.aggregator.household_concurrency, 2);
    }

    #[test]
    fn test_file_with_environment_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
project_id = "ourarchive-prod"
endpoint = "http://localhost:8081"
page_size = 50

[scheduler]
cron = "30 2 * * *"
"#
        )
        .unwrap();

        let cfg = Config::build(
            Some(file.path()),
            env_from(&[("OURARCHIVE_STATS__STORE__PAGE_SIZE", "100")]),
        )
        .unwrap();

        let firestore = cfg.store.firestore_config().unwrap();
        assert_eq!(firestore.project_id, "ourarchive-prod");
        assert_eq!(firestore.endpoint, "http://localhost:8081");
        assert_eq!(firestore.page_size, 100);
        assert_eq!(cfg.scheduler.cron, "30 2 * * *");
        assert_eq!(firestore.credentials, Credentials::None);
    }

    #[test]
    fn test_credentials_selection() {
        let mut store = StoreConfig {
            project_id: Some("ourarchive-prod".to_string()),
            access_token: Some("static-token".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(
            store.firestore_config().unwrap().credentials,
            Credentials::Static("static-token".to_string())
        );

        store.metadata_credentials = true;
        assert_eq!(
            store.firestore_config().unwrap().credentials,
            Credentials::Metadata {
                endpoint: DEFAULT_METADATA_ENDPOINT.to_string()
            }
        );
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let err = Config::build(
            None,
            env_from(&[
                ("OURARCHIVE_STATS__STORE__BACKEND", "memory"),
                ("OURARCHIVE_STATS__SCHEDULER__CRON", "*/5 * * * *"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cron"));
    }
}
