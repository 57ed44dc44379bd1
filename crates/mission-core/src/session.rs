//! Per-mission state owned by the machine and lent to episodes.

use std::sync::Arc;

use mission_types::{MissionDescriptor, MissionId, Phase};
use tracing::warn;

use crate::handlers::BehaviorHandlers;

/// Everything that outlives a single phase but not a mission.
#[derive(Debug, Default)]
pub(crate) struct MissionSession {
    /// Descriptor handed over at construction, consumed by the first
    /// dormant phase.
    pub(crate) injected: Option<Arc<MissionDescriptor>>,
    pub(crate) descriptor: Option<Arc<MissionDescriptor>>,
    pub(crate) mission_id: Option<MissionId>,
    pub(crate) handlers: Option<BehaviorHandlers>,
    /// Why handlers could not be built for the current mission.
    pub(crate) handler_failure: Option<String>,
    pub(crate) quit_code: String,
    pub(crate) error_details: Option<String>,
}

impl MissionSession {
    /// Drop everything tied to the current mission.
    pub(crate) fn end_mission(&mut self) {
        self.descriptor = None;
        self.mission_id = None;
        self.handlers = None;
        self.handler_failure = None;
    }
}

/// The pending next phase of the active episode. First signal wins.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    next: Option<Phase>,
}

impl Completion {
    /// Record a completion. Returns `false` when one was already pending.
    pub(crate) fn signal(&mut self, from: Phase, next: Phase) -> bool {
        if let Some(pending) = self.next {
            warn!(
                phase = %from,
                requested = %next,
                pending = %pending,
                "Ignoring second completion signal"
            );
            return false;
        }
        self.next = Some(next);
        true
    }

    pub(crate) const fn pending(&self) -> Option<Phase> {
        self.next
    }
}
