//! Observed instance types
//!
//! An ObservedInstance is the reconciler's record of one running workload
//! unit. The container runtime owns the actual process; this record only
//! tracks what probes and issued actions have told us about it.

use crate::{InstanceId, TemplateHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instance lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstancePhase {
    /// Create issued, no counted probe success yet
    Pending,

    /// Answering probes, not yet serving
    Running,

    /// Passed the readiness gate and serving
    Ready,

    /// Failed liveness (or never came up); will be destroyed
    Failed,

    /// Destroy issued; record is removed on the next tick
    Terminating,
}

impl InstancePhase {
    /// Phases that count toward the replica count
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstancePhase::Pending | InstancePhase::Running | InstancePhase::Ready
        )
    }

    /// Scale-down preference: lower ranks are destroyed first.
    ///
    /// `None` for Terminating, which is never a candidate.
    pub fn removal_rank(&self) -> Option<u8> {
        match self {
            InstancePhase::Failed => Some(0),
            InstancePhase::Pending => Some(1),
            InstancePhase::Running => Some(2),
            InstancePhase::Ready => Some(3),
            InstancePhase::Terminating => None,
        }
    }
}

impl std::fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstancePhase::Pending => write!(f, "pending"),
            InstancePhase::Running => write!(f, "running"),
            InstancePhase::Ready => write!(f, "ready"),
            InstancePhase::Failed => write!(f, "failed"),
            InstancePhase::Terminating => write!(f, "terminating"),
        }
    }
}

/// Last probe outcome seen for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub at: DateTime<Utc>,
    pub success: bool,
}

/// A probe outcome as delivered by a prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Whether the health check passed
    pub success: bool,

    /// When the probe ran
    pub timestamp: DateTime<Utc>,

    /// Restart count the runtime reports for the instance, if known
    pub observed_restarts: Option<u32>,
}

impl ProbeReport {
    pub fn success(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            timestamp,
            observed_restarts: None,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            timestamp,
            observed_restarts: None,
        }
    }

    pub fn with_observed_restarts(mut self, restarts: u32) -> Self {
        self.observed_restarts = Some(restarts);
        self
    }
}

/// One running workload unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    /// Unique instance identifier
    pub id: InstanceId,

    /// Current lifecycle phase
    pub phase: InstancePhase,

    /// Most recent probe outcome
    pub last_probe: Option<ProbeRecord>,

    /// Times this instance has been restarted, by us or by the runtime
    pub restart_count: u32,

    /// Restart count last reported by the runtime itself
    #[serde(default)]
    pub observed_restarts: u32,

    /// When the create (or last restart) was issued
    pub created_at: DateTime<Utc>,

    /// Counted consecutive probe successes
    pub consecutive_successes: u32,

    /// Counted consecutive probe failures
    pub consecutive_failures: u32,

    /// Template the instance was created or last restarted with
    pub template_hash: TemplateHash,
}

impl ObservedInstance {
    /// A freshly created instance
    pub fn pending(id: InstanceId, template_hash: TemplateHash, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: InstancePhase::Pending,
            last_probe: None,
            restart_count: 0,
            observed_restarts: 0,
            created_at: now,
            consecutive_successes: 0,
            consecutive_failures: 0,
            template_hash,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase.is_live()
    }

    /// Reset probe history after the instance was (re)started
    pub fn reset_probe_counters(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }
}
