//! Monitor configuration

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix, e.g. `MONITOR_ANALYSIS_ENDPOINT`
const ENV_PREFIX: &str = "MONITOR";

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Node or pod name used as a log field
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Analysis service endpoint receiving alert requests
    #[serde(default = "default_analysis_endpoint")]
    pub analysis_endpoint: String,

    /// Minimum time between two alerts for the same pod
    #[serde(default = "default_suppression_window")]
    pub suppression_window_secs: u64,

    /// Interval between suppression cache sweeps (0 disables eviction)
    #[serde(default = "default_suppression_sweep_interval")]
    pub suppression_sweep_interval_secs: u64,

    /// Full resync period of the pod mirror
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,

    /// Deadline for the initial pod list
    #[serde(default = "default_initial_sync_timeout")]
    pub initial_sync_timeout_secs: u64,

    /// Timeout for one alert request
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// Number of handler workers
    #[serde(default = "default_handler_workers")]
    pub handler_workers: usize,

    /// Restrict watching to one namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// Restrict watching to pods matching this label selector
    #[serde(default)]
    pub label_selector: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_analysis_endpoint() -> String {
    monitor_lib::dispatcher::DEFAULT_ANALYSIS_ENDPOINT.to_string()
}

fn default_suppression_window() -> u64 {
    monitor_lib::suppression::DEFAULT_SUPPRESSION_WINDOW.as_secs()
}

fn default_suppression_sweep_interval() -> u64 {
    monitor_lib::suppression::DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_resync_period() -> u64 {
    monitor_lib::watcher::DEFAULT_RESYNC_PERIOD.as_secs()
}

fn default_initial_sync_timeout() -> u64 {
    monitor_lib::watcher::DEFAULT_INITIAL_SYNC_TIMEOUT.as_secs()
}

fn default_dispatch_timeout() -> u64 {
    monitor_lib::dispatcher::DEFAULT_DISPATCH_TIMEOUT.as_secs()
}

fn default_handler_workers() -> usize {
    monitor_lib::watcher::DEFAULT_HANDLER_WORKERS
}

impl MonitorConfig {
    /// Load configuration from `MONITOR_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read monitor configuration")?
            .try_deserialize()
            .context("Invalid monitor configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.analysis_endpoint)
            .with_context(|| format!("Invalid analysis endpoint: {}", self.analysis_endpoint))?;
        ensure!(
            self.suppression_window_secs > 0,
            "suppression_window_secs must be greater than zero"
        );
        ensure!(
            self.initial_sync_timeout_secs > 0,
            "initial_sync_timeout_secs must be greater than zero"
        );
        ensure!(
            self.dispatch_timeout_secs > 0,
            "dispatch_timeout_secs must be greater than zero"
        );
        ensure!(self.handler_workers > 0, "handler_workers must be greater than zero");
        Ok(())
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn suppression_sweep_interval(&self) -> Option<Duration> {
        match self.suppression_sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn initial_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_sync_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}
