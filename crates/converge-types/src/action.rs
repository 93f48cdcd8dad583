//! Corrective actions emitted by a reconcile tick
//!
//! Actions are fire-and-forget toward the container runtime. The reconciler
//! learns whether they took effect only through later probe results or an
//! explicit failure report.

use crate::InstanceId;
use serde::{Deserialize, Serialize};

/// A single corrective action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Start a new instance under the given (freshly generated) id
    CreateInstance { id: InstanceId },

    /// Stop and remove an instance
    DestroyInstance { id: InstanceId },

    /// Restart an instance with the current template
    RestartInstance { id: InstanceId },
}

impl ReconcileAction {
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            ReconcileAction::CreateInstance { id }
            | ReconcileAction::DestroyInstance { id }
            | ReconcileAction::RestartInstance { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileAction::CreateInstance { .. } => "create",
            ReconcileAction::DestroyInstance { .. } => "destroy",
            ReconcileAction::RestartInstance { .. } => "restart",
        }
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.instance_id())
    }
}

/// Ordered list of actions produced by one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileActions(Vec<ReconcileAction>);

impl ReconcileActions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, action: ReconcileAction) {
        self.0.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReconcileAction> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ReconcileAction] {
        &self.0
    }

    pub fn creates(&self) -> impl Iterator<Item = &InstanceId> {
        self.0.iter().filter_map(|a| match a {
            ReconcileAction::CreateInstance { id } => Some(id),
            _ => None,
        })
    }

    pub fn destroys(&self) -> impl Iterator<Item = &InstanceId> {
        self.0.iter().filter_map(|a| match a {
            ReconcileAction::DestroyInstance { id } => Some(id),
            _ => None,
        })
    }

    pub fn restarts(&self) -> impl Iterator<Item = &InstanceId> {
        self.0.iter().filter_map(|a| match a {
            ReconcileAction::RestartInstance { id } => Some(id),
            _ => None,
        })
    }
}

impl IntoIterator for ReconcileActions {
    type Item = ReconcileAction;
    type IntoIter = std::vec::IntoIter<ReconcileAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ReconcileActions {
    type Item = &'a ReconcileAction;
    type IntoIter = std::slice::Iter<'a, ReconcileAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<ReconcileAction> for ReconcileActions {
    fn from_iter<I: IntoIterator<Item = ReconcileAction>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
