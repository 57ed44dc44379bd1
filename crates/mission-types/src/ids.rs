//! Mission identifiers.
//!
//! Identifiers use UUID v7 (time-ordered) so that log lines from
//! consecutive missions sort naturally.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a mission when the dormant phase accepts its
/// descriptor. Used to correlate log lines and transition records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(Uuid);

impl MissionId {
    /// A fresh, time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MissionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mission_ids_are_unique() {
        let a = MissionId::new();
        let b = MissionId::new();
        assert_ne!(a, b);
        assert_ne!(a.0, Uuid::nil());
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = MissionId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
        let back: MissionId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }
}
