//! Reconciler configuration.

use std::time::Duration;

use converge_types::duration_serde;
use serde::{Deserialize, Serialize};

/// Tunables for the reconcile loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// A Pending instance with no probe result for this long is treated
    /// as failed and replaced.
    #[serde(default = "default_startup_timeout", with = "duration_serde")]
    pub startup_timeout: Duration,

    /// Maximum number of live instances allowed out of service at once
    /// while restarting onto a new template.
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: u32,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            max_unavailable: default_max_unavailable(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_unavailable() -> u32 {
    1
}

fn default_event_capacity() -> usize {
    1024
}
