//! Configuration for converged

use converge_reconciler::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Reconcile loop tunables
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Container runtime backend
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Probe interval in milliseconds. Defaults to the shorter of the
    /// spec's readiness and liveness periods.
    #[serde(default)]
    pub probe_interval_ms: Option<u64>,

    /// Upper bound on a single runtime call in milliseconds
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            probe_interval_ms: None,
            action_timeout_ms: default_action_timeout(),
        }
    }
}

/// Container runtime backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeConfig {
    /// In-process runtime (for development/testing)
    Memory {
        /// How long a new container takes before it answers probes
        #[serde(default)]
        startup_delay_ms: u64,
    },
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig::Memory {
            startup_delay_ms: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_tick_interval() -> u64 {
    2_000
}

fn default_action_timeout() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the file if given, then
    /// `CONVERGE_*` environment variables (`CONVERGE_SCHEDULER__TICK_INTERVAL_MS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONVERGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
