//! Container runtime seam.
//!
//! The reconciler decides; a `ContainerRuntime` carries out creates,
//! destroys and restarts. `InMemoryRuntime` keeps containers in a map and
//! lets tests inject refusals, crashes and unhealthy instances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_types::{DesiredSpec, InstanceId};
use dashmap::DashMap;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

/// Runtime that executes reconcile actions.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container for a new instance.
    async fn create(&self, id: &InstanceId, spec: &DesiredSpec) -> Result<(), RuntimeError>;

    /// Stop and remove an instance's container.
    async fn destroy(&self, id: &InstanceId) -> Result<(), RuntimeError>;

    /// Replace an instance's container with one built from `spec`.
    async fn restart(&self, id: &InstanceId, spec: &DesiredSpec) -> Result<(), RuntimeError>;
}

/// What a health check against a container sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Started and answering health checks
    pub healthy: bool,

    /// Times the runtime restarted the container
    pub restarts: u32,
}

#[derive(Debug, Clone)]
struct Container {
    name: String,
    image: String,
    started_at: DateTime<Utc>,
    healthy: bool,
    restarts: u32,
}

/// In-process runtime for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    containers: DashMap<InstanceId, Container>,
    refuse_creates: AtomicBool,
    startup_delay: Duration,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        match config {
            RuntimeConfig::Memory { startup_delay_ms } => {
                Self::new().with_startup_delay(Duration::from_millis(*startup_delay_ms))
            }
        }
    }

    /// Containers stay unhealthy for `delay` after starting.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Refuse every create until switched off again.
    pub fn set_refuse_creates(&self, refuse: bool) {
        self.refuse_creates.store(refuse, Ordering::SeqCst);
    }

    /// Mark a container healthy or not. Returns false if it does not exist.
    pub fn set_healthy(&self, id: &InstanceId, healthy: bool) -> bool {
        match self.containers.get_mut(id) {
            Some(mut container) => {
                container.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// Simulate the runtime restarting a crashed container on its own.
    pub fn crash(&self, id: &InstanceId) -> bool {
        match self.containers.get_mut(id) {
            Some(mut container) => {
                container.restarts += 1;
                container.started_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.containers.contains_key(id)
    }

    /// Runtime handle, `<workload>-<short id>`.
    pub fn container_name(&self, id: &InstanceId) -> Option<String> {
        self.containers.get(id).map(|c| c.name.clone())
    }

    pub fn image_of(&self, id: &InstanceId) -> Option<String> {
        self.containers.get(id).map(|c| c.image.clone())
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.containers.iter().map(|c| c.key().clone()).collect()
    }

    /// Current status of a container, if it exists.
    pub fn status(&self, id: &InstanceId) -> Option<ContainerStatus> {
        let now = Utc::now();
        self.containers.get(id).map(|container| {
            let started = (now - container.started_at)
                .to_std()
                .map(|up| up >= self.startup_delay)
                .unwrap_or(self.startup_delay.is_zero());
            ContainerStatus {
                healthy: container.healthy && started,
                restarts: container.restarts,
            }
        })
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create(&self, id: &InstanceId, spec: &DesiredSpec) -> Result<(), RuntimeError> {
        if self.refuse_creates.load(Ordering::SeqCst) {
            return Err(RuntimeError::Refused {
                instance_id: id.clone(),
                action: "create",
                reason: "creates disabled".into(),
            });
        }

        let name = format!("{}-{}", spec.name, id.short());
        debug!(instance_id = %id, container = %name, image = %spec.image, "Starting container");
        self.containers.insert(
            id.clone(),
            Container {
                name,
                image: spec.image.to_string(),
                started_at: Utc::now(),
                healthy: true,
                restarts: 0,
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &InstanceId) -> Result<(), RuntimeError> {
        debug!(instance_id = %id, "Removing container");
        self.containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))
    }

    async fn restart(&self, id: &InstanceId, spec: &DesiredSpec) -> Result<(), RuntimeError> {
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))?;

        debug!(container = %container.name, image = %spec.image, "Restarting container");
        container.image = spec.image.to_string();
        container.started_at = Utc::now();
        container.healthy = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_types::ImageRef;

    fn spec(tag: &str) -> DesiredSpec {
        DesiredSpec::new("web", ImageRef::new("web", tag), 1)
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let runtime = InMemoryRuntime::new();
        let id = InstanceId::generate();

        runtime.create(&id, &spec("1.0")).await.unwrap();
        assert!(runtime.contains(&id));
        assert_eq!(
            runtime.status(&id),
            Some(ContainerStatus {
                healthy: true,
                restarts: 0
            })
        );

        assert_eq!(
            runtime.container_name(&id),
            Some(format!("web-{}", id.short()))
        );

        runtime.destroy(&id).await.unwrap();
        assert_eq!(runtime.container_count(), 0);
        assert_eq!(
            runtime.destroy(&id).await,
            Err(RuntimeError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn test_refused_create() {
        let runtime = InMemoryRuntime::new();
        runtime.set_refuse_creates(true);

        let result = runtime.create(&InstanceId::generate(), &spec("1.0")).await;
        assert!(matches!(result, Err(RuntimeError::Refused { .. })));
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_swaps_image() {
        let runtime = InMemoryRuntime::new();
        let id = InstanceId::generate();
        runtime.create(&id, &spec("1.0")).await.unwrap();
        runtime.set_healthy(&id, false);

        runtime.restart(&id, &spec("2.0")).await.unwrap();
        assert_eq!(runtime.image_of(&id).as_deref(), Some("web:2.0"));
        assert_eq!(runtime.status(&id).map(|s| s.healthy), Some(true));
    }

    #[tokio::test]
    async fn test_startup_delay_gates_health() {
        let runtime = InMemoryRuntime::new().with_startup_delay(Duration::from_secs(60));
        let id = InstanceId::generate();
        runtime.create(&id, &spec("1.0")).await.unwrap();

        assert_eq!(runtime.status(&id).map(|s| s.healthy), Some(false));
    }

    #[tokio::test]
    async fn test_crash_counts_restarts() {
        let runtime = InMemoryRuntime::new();
        let id = InstanceId::generate();
        assert!(!runtime.crash(&id));

        runtime.create(&id, &spec("1.0")).await.unwrap();
        assert!(runtime.crash(&id));
        assert_eq!(runtime.status(&id).map(|s| s.restarts), Some(1));
    }
}
