//! Event types for reconciler observability
//!
//! Events provide a unified stream of instance lifecycle activity.

use crate::{InstanceId, InstancePhase};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all reconcile events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Workload the event belongs to
    pub workload: String,

    /// Tick that produced the event, if any
    pub tick: Option<u64>,

    /// The actual event
    pub event: ReconcileEvent,
}

impl ReconcileEventEnvelope {
    pub fn new(event: ReconcileEvent, workload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: event.default_severity(),
            workload: workload.into(),
            tick: None,
            event,
        }
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Reconcile events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileEvent {
    /// Desired spec replaced
    SpecReplaced {
        replica_count: u32,
        image: String,
    },

    /// Create issued for a new instance
    InstanceCreated { instance_id: InstanceId },

    /// Destroy issued; instance is terminating
    InstanceTerminating {
        instance_id: InstanceId,
        from_phase: InstancePhase,
    },

    /// Terminating record removed
    InstanceRemoved { instance_id: InstanceId },

    /// Restart issued
    InstanceRestarted {
        instance_id: InstanceId,
        restart_count: u32,
    },

    /// Phase changed as a result of a probe
    PhaseChanged {
        instance_id: InstanceId,
        from: InstancePhase,
        to: InstancePhase,
    },

    /// Runtime refused an action
    ActionFailed {
        instance_id: InstanceId,
        action: String,
        reason: String,
    },
}

impl ReconcileEvent {
    fn default_severity(&self) -> EventSeverity {
        match self {
            ReconcileEvent::PhaseChanged {
                to: InstancePhase::Failed,
                ..
            } => EventSeverity::Warning,
            ReconcileEvent::ActionFailed { .. } => EventSeverity::Error,
            ReconcileEvent::InstanceRemoved { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}
