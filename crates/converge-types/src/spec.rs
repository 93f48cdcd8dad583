//! Desired state for a workload
//!
//! A DesiredSpec is the operator's declared target: how many instances to
//! run, what they run, and how their health is judged. Specs are immutable;
//! a change is a whole new spec handed to the reconciler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Immutable description of intended state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSpec {
    /// Workload name
    pub name: String,

    /// Number of instances that should be live
    pub replica_count: u32,

    /// Image the instances run
    pub image: ImageRef,

    /// CPU and memory requests/limits
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Readiness probe: gates Pending -> Ready
    pub readiness: ProbeConfig,

    /// Liveness probe: gates any phase -> Failed
    pub liveness: ProbeConfig,

    /// Environment passed to every instance
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DesiredSpec {
    /// Create a spec with default resources and probes
    pub fn new(name: impl Into<String>, image: ImageRef, replica_count: u32) -> Self {
        Self {
            name: name.into(),
            replica_count,
            image,
            resources: ResourceRequirements::default(),
            readiness: ProbeConfig::readiness_default(),
            liveness: ProbeConfig::liveness_default(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_readiness(mut self, probe: ProbeConfig) -> Self {
        self.readiness = probe;
        self
    }

    pub fn with_liveness(mut self, probe: ProbeConfig) -> Self {
        self.liveness = probe;
        self
    }

    /// Copy of this spec with a new replica count.
    ///
    /// Replica counts arriving from outside (manifests, scaling commands)
    /// are signed; negatives are rejected here.
    pub fn scaled(&self, replica_count: i64) -> Result<Self, InvalidSpec> {
        if replica_count < 0 {
            return Err(InvalidSpec::NegativeReplicaCount(replica_count));
        }
        let replica_count = u32::try_from(replica_count)
            .map_err(|_| InvalidSpec::ReplicaCountTooLarge(replica_count))?;
        Ok(Self {
            replica_count,
            ..self.clone()
        })
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<(), InvalidSpec> {
        if self.name.trim().is_empty() {
            return Err(InvalidSpec::EmptyName);
        }

        self.image.validate()?;
        self.resources.validate()?;
        self.readiness.validate("readiness")?;
        self.liveness.validate("liveness")?;

        Ok(())
    }

    /// Digest of the fields that define what an instance runs.
    ///
    /// Replica count and probe settings are excluded: changing them never
    /// requires touching an existing instance.
    pub fn template_hash(&self) -> TemplateHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.image.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.image.tag.as_bytes());
        hasher.update(&[0]);
        for quantity in [&self.resources.requests, &self.resources.limits] {
            hasher.update(&quantity.cpu_millis.to_le_bytes());
            hasher.update(&quantity.memory_bytes.to_le_bytes());
        }
        for (key, value) in &self.env {
            hasher.update(key.as_bytes());
            hasher.update(&[b'=']);
            hasher.update(value.as_bytes());
            hasher.update(&[0]);
        }
        TemplateHash(*hasher.finalize().as_bytes())
    }
}

/// Image reference: opaque identifier plus version tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    fn validate(&self) -> Result<(), InvalidSpec> {
        if self.name.trim().is_empty() {
            return Err(InvalidSpec::EmptyImage);
        }
        if self.tag.trim().is_empty() {
            return Err(InvalidSpec::EmptyImageTag(self.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// A cpu/memory amount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    /// CPU in millicores
    pub cpu_millis: u32,

    /// Memory in bytes
    pub memory_bytes: u64,
}

impl ResourceQuantity {
    pub fn new(cpu_millis: u32, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }
}

/// Resource request and limit pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requests: ResourceQuantity,
    pub limits: ResourceQuantity,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            requests: ResourceQuantity::new(100, 128 * 1024 * 1024),
            limits: ResourceQuantity::new(500, 512 * 1024 * 1024),
        }
    }
}

impl ResourceRequirements {
    fn validate(&self) -> Result<(), InvalidSpec> {
        if self.limits.cpu_millis < self.requests.cpu_millis {
            return Err(InvalidSpec::LimitBelowRequest {
                resource: "cpu",
                request: u64::from(self.requests.cpu_millis),
                limit: u64::from(self.limits.cpu_millis),
            });
        }
        if self.limits.memory_bytes < self.requests.memory_bytes {
            return Err(InvalidSpec::LimitBelowRequest {
                resource: "memory",
                request: self.requests.memory_bytes,
                limit: self.limits.memory_bytes,
            });
        }
        Ok(())
    }
}

/// Configuration for a health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// HTTP path probed on the instance
    pub path: String,

    /// Port probed on the instance
    pub port: u16,

    /// Results before this delay (from creation) do not count
    #[serde(with = "crate::duration_serde")]
    pub initial_delay: Duration,

    /// Time between probes
    #[serde(with = "crate::duration_serde")]
    pub period: Duration,

    /// Probe timeout
    #[serde(with = "crate::duration_serde")]
    pub timeout: Duration,

    /// Consecutive results needed to flip state.
    ///
    /// For liveness this is the failure count that marks an instance
    /// Failed. For readiness it is both the success count that makes a
    /// Pending instance Ready and the failure count that takes a Ready
    /// instance out of service.
    pub failure_threshold: u32,
}

impl ProbeConfig {
    pub fn new(path: impl Into<String>, port: u16) -> Self {
        Self {
            path: path.into(),
            port,
            initial_delay: Duration::ZERO,
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(1),
            failure_threshold: 3,
        }
    }

    pub fn readiness_default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            ..Self::new("/ready", 8080)
        }
    }

    pub fn liveness_default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            period: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            ..Self::new("/health", 8080)
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    fn validate(&self, probe: &'static str) -> Result<(), InvalidSpec> {
        if self.period.is_zero() {
            return Err(InvalidSpec::InvalidProbe {
                probe,
                reason: "period must be > 0".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(InvalidSpec::InvalidProbe {
                probe,
                reason: "timeout must be > 0".into(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(InvalidSpec::InvalidProbe {
                probe,
                reason: "failure_threshold must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Digest of an instance template
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateHash([u8; 32]);

impl TemplateHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TemplateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TemplateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateHash({})", self)
    }
}

/// Spec validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSpec {
    #[error("replica count cannot be negative: {0}")]
    NegativeReplicaCount(i64),

    #[error("replica count out of range: {0}")]
    ReplicaCountTooLarge(i64),

    #[error("workload name cannot be empty")]
    EmptyName,

    #[error("image name cannot be empty")]
    EmptyImage,

    #[error("image {0} has an empty tag")]
    EmptyImageTag(String),

    #[error("{resource} limit {limit} is below request {request}")]
    LimitBelowRequest {
        resource: &'static str,
        request: u64,
        limit: u64,
    },

    #[error("invalid {probe} probe: {reason}")]
    InvalidProbe { probe: &'static str, reason: String },
}
