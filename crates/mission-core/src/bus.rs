//! Message bus contract.
//!
//! The bus carries typed [`Message`]s between the server and its remote
//! participants. Outbound messages go to everyone or to one participant.
//! Inbound delivery is gated by listener registration: a type nobody has
//! registered for is dropped by the transport.
//!
//! Registrations are reference counted ([`ListenerRegistry`]), so two
//! listeners for the same type may overlap and deregistering one leaves the
//! other in place.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use mission_types::{Message, MessageType};

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected participant.
    All,
    /// One participant, by name.
    Participant(String),
}

/// The transport the state machine talks through.
///
/// Every method takes `&self` and must not block: sends are queued by the
/// implementation, not awaited.
pub trait MessageBus: Send + Sync {
    /// Queue a message for delivery.
    fn send(&self, recipient: Recipient, message: Message);

    /// Start forwarding inbound messages of this type.
    fn register_listener(&self, kind: MessageType);

    /// Stop forwarding inbound messages of this type, once every
    /// registration has been released.
    fn deregister_listener(&self, kind: MessageType);

    /// Queue a message for every participant.
    fn send_to_all(&self, message: Message) {
        self.send(Recipient::All, message);
    }
}

/// Reference-counted listener registrations per message type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerRegistry {
    counts: BTreeMap<MessageType, usize>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Add one registration. Returns the new count for the type.
    pub fn register(&mut self, kind: MessageType) -> usize {
        let count = self.counts.entry(kind).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Release one registration. Returns the remaining count.
    ///
    /// Releasing a type that was never registered is a no-op.
    pub fn deregister(&mut self, kind: MessageType) -> usize {
        let Some(count) = self.counts.get_mut(&kind) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(&kind);
        }
        remaining
    }

    /// Number of live registrations for a type.
    pub fn count(&self, kind: MessageType) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Whether at least one listener wants this type.
    pub fn is_registered(&self, kind: MessageType) -> bool {
        self.count(kind) > 0
    }
}

/// An in-memory [`MessageBus`] that records every outbound message and
/// tracks registrations. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingBus {
    sent: Mutex<Vec<(Recipient, Message)>>,
    listeners: Mutex<ListenerRegistry>,
}

impl RecordingBus {
    /// Create an empty recording bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message sent so far, in order.
    pub fn sent(&self) -> Vec<(Recipient, Message)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every message of one type sent so far, in order.
    pub fn sent_of(&self, kind: MessageType) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, message)| message.kind == kind)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Drain the recorded messages.
    pub fn take_sent(&self) -> Vec<(Recipient, Message)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Live registrations for a type.
    pub fn listener_count(&self, kind: MessageType) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count(kind)
    }
}

impl MessageBus for RecordingBus {
    fn send(&self, recipient: Recipient, message: Message) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((recipient, message));
    }

    fn register_listener(&self, kind: MessageType) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind);
    }

    fn deregister_listener(&self, kind: MessageType) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deregister(kind);
    }
}
