//! Health probing.
//!
//! A `Prober` runs one health check against an instance and turns the
//! outcome into a `ProbeReport` for the reconciler. Timeouts count as
//! failures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use converge_types::{InstanceId, ProbeConfig, ProbeReport};
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::runtime::InMemoryRuntime;

/// Runs health checks against instances.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Check one instance using the given probe settings.
    async fn probe(&self, id: &InstanceId, config: &ProbeConfig) -> ProbeReport;
}

/// Prober that asks the in-memory runtime for container status.
#[derive(Debug, Clone)]
pub struct RuntimeProber {
    runtime: Arc<InMemoryRuntime>,
}

impl RuntimeProber {
    pub fn new(runtime: Arc<InMemoryRuntime>) -> Self {
        Self { runtime }
    }

    async fn check(&self, id: &InstanceId) -> ProbeReport {
        let now = Utc::now();
        match self.runtime.status(id) {
            Some(status) if status.healthy => {
                ProbeReport::success(now).with_observed_restarts(status.restarts)
            }
            Some(status) => ProbeReport::failure(now).with_observed_restarts(status.restarts),
            None => ProbeReport::failure(now),
        }
    }
}

#[async_trait]
impl Prober for RuntimeProber {
    #[instrument(skip(self, config), fields(instance_id = %id, path = %config.path))]
    async fn probe(&self, id: &InstanceId, config: &ProbeConfig) -> ProbeReport {
        match timeout(config.timeout, self.check(id)).await {
            Ok(report) => report,
            Err(_) => {
                debug!(timeout_ms = config.timeout.as_millis() as u64, "Probe timed out");
                ProbeReport::failure(Utc::now())
            }
        }
    }
}
