//! Strongly-typed identifiers
//!
//! Instance IDs are UUID-based but wrapped in a newtype for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a workload instance, assigned at creation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, used in runtime container names
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_generation() {
        let id1 = InstanceId::generate();
        let id2 = InstanceId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_instance_id_display() {
        let id = InstanceId::generate();
        assert!(id.to_string().starts_with("instance:"));
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_instance_id_ordering_follows_uuid() {
        let low = InstanceId::from_uuid(Uuid::from_u128(1));
        let high = InstanceId::from_uuid(Uuid::from_u128(2));
        assert!(low < high);
    }
}
