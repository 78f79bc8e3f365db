//! Observability: structured logging and Prometheus metrics.

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

/// Initialize the global tracing subscriber and the metrics recorder.
///
/// Logs go to stderr so `aggregate` output on stdout stays parseable.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?;
    }

    self::metrics::install()?;
    tracing::debug!(service = service_name, "observability initialized");
    Ok(())
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use std::sync::OnceLock;
    use std::time::Duration;

    use crate::stats::StatsSnapshot;

    static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

    /// Install the Prometheus recorder and register metric descriptions.
    /// Calling it again is a no-op.
    pub fn install() -> anyhow::Result<()> {
        if PROMETHEUS.get().is_some() {
            return Ok(());
        }
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROMETHEUS.set(handle);
        register_metrics();
        Ok(())
    }

    /// Prometheus text exposition, empty when no recorder is installed.
    pub fn render() -> String {
        PROMETHEUS.get().map(|h| h.render()).unwrap_or_default()
    }

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "ourarchive_stats_runs_total",
            "Aggregation runs by outcome"
        );
        describe_counter!(
            "ourarchive_stats_errors_total",
            "Errors raised, by error code"
        );
        describe_histogram!(
            "ourarchive_stats_run_duration_seconds",
            "Wall time of an aggregation run"
        );
        describe_gauge!("ourarchive_stats_users", "Published user count");
        describe_gauge!("ourarchive_stats_households", "Published household count");
        describe_gauge!("ourarchive_stats_items", "Published item count");
        describe_gauge!("ourarchive_stats_containers", "Published container count");
    }

    /// Record the outcome and duration of one aggregation run.
    pub fn record_run(success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        counter!("ourarchive_stats_runs_total", "outcome" => outcome).increment(1);
        histogram!("ourarchive_stats_run_duration_seconds").record(elapsed.as_secs_f64());
    }

    /// Mirror the published counts as gauges.
    pub fn record_snapshot(snapshot: &StatsSnapshot) {
        gauge!("ourarchive_stats_users").set(snapshot.user_count as f64);
        gauge!("ourarchive_stats_households").set(snapshot.household_count as f64);
        gauge!("ourarchive_stats_items").set(snapshot.item_count as f64);
        gauge!("ourarchive_stats_containers").set(snapshot.container_count as f64);
    }
}
