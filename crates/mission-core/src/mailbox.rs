//! Single-slot hand-off for mission descriptors.
//!
//! Any thread may deposit a descriptor; the dormant phase takes it on its
//! next tick. The slot holds at most one descriptor, and a later deposit
//! replaces an earlier one that was not yet taken.

use std::sync::{Arc, Mutex, PoisonError};

use mission_types::MissionDescriptor;
use tracing::{debug, warn};

/// Mutex-guarded optional descriptor shared between the machine and
/// whoever requests missions.
#[derive(Debug, Default)]
pub struct MissionMailbox {
    slot: Mutex<Option<Arc<MissionDescriptor>>>,
}

impl MissionMailbox {
    /// Create an empty mailbox.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store a descriptor. Returns the one it replaced, if any.
    pub fn deposit(&self, descriptor: Arc<MissionDescriptor>) -> Option<Arc<MissionDescriptor>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(summary = %descriptor.summary, "Mission descriptor queued");
        let replaced = slot.replace(descriptor);
        if let Some(old) = &replaced {
            warn!(summary = %old.summary, "Queued mission replaced before it was taken");
        }
        replaced
    }

    /// Read and clear the slot.
    pub fn take(&self) -> Option<Arc<MissionDescriptor>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Look at the queued descriptor without taking it.
    pub fn peek(&self) -> Option<Arc<MissionDescriptor>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a descriptor is waiting.
    pub fn is_occupied(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;

    #[test]
    fn take_clears_the_slot() {
        let mailbox = MissionMailbox::new();
        assert!(mailbox.take().is_none());

        mailbox.deposit(Arc::new(descriptor(&["AgentA"])));
        assert!(mailbox.is_occupied());
        assert!(mailbox.take().is_some());
        assert!(!mailbox.is_occupied());
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn last_write_wins() {
        let mailbox = MissionMailbox::new();
        let mut first = descriptor(&[]);
        first.summary = "first".into();
        let mut second = descriptor(&[]);
        second.summary = "second".into();

        assert!(mailbox.deposit(Arc::new(first)).is_none());
        let replaced = mailbox.deposit(Arc::new(second)).unwrap();
        assert_eq!(replaced.summary, "first");
        assert_eq!(mailbox.peek().unwrap().summary, "second");
        assert_eq!(mailbox.take().unwrap().summary, "second");
    }

    #[test]
    fn deposits_from_other_threads_are_visible() {
        let mailbox = Arc::new(MissionMailbox::new());
        let writer = Arc::clone(&mailbox);
        std::thread::spawn(move || {
            writer.deposit(Arc::new(descriptor(&["AgentA"])));
        })
        .join()
        .unwrap();
        assert!(mailbox.take().is_some());
    }
}
