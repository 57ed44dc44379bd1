//! NATS-backed message bus.
//!
//! [`NatsBus`] implements [`MessageBus`] by publishing JSON-encoded
//! [`Message`]s. Sends never block the state machine: they are queued on an
//! unbounded channel and published by a background task.
//!
//! Inbound participant messages are received by a second task, filtered
//! against the bus's listener registrations, and forwarded to the run loop
//! over a bounded channel.
//!
//! # Subject Convention
//!
//! - **Broadcast:** `{prefix}.server.all`
//! - **To one participant:** `{prefix}.server.to.{participant}`
//! - **From participants:** `{prefix}.participant.{participant}`
//! - **Mission requests:** `{prefix}.control.mission` (JSON descriptor)

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt as _;
use mission_core::bus::{ListenerRegistry, MessageBus, Recipient};
use mission_core::mailbox::MissionMailbox;
use mission_types::{Message, MessageType, MissionDescriptor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ServerError;

/// Subject names derived from the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    prefix: String,
}

impl Subjects {
    /// Subjects under `prefix`.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('.').to_owned(),
        }
    }

    /// Where a message for `recipient` is published.
    pub fn outbound(&self, recipient: &Recipient) -> String {
        match recipient {
            Recipient::All => format!("{}.server.all", self.prefix),
            Recipient::Participant(name) => format!("{}.server.to.{name}", self.prefix),
        }
    }

    /// Wildcard covering every participant's outbound subject.
    pub fn inbound(&self) -> String {
        format!("{}.participant.>", self.prefix)
    }

    /// Where mission descriptors are submitted.
    pub fn mission_requests(&self) -> String {
        format!("{}.control.mission", self.prefix)
    }
}

struct Outbound {
    subject: String,
    body: Vec<u8>,
}

/// A [`MessageBus`] publishing on NATS.
pub struct NatsBus {
    subjects: Subjects,
    outbound: mpsc::UnboundedSender<Outbound>,
    listeners: Arc<Mutex<ListenerRegistry>>,
}

impl NatsBus {
    /// Start the publisher task and return the bus.
    pub fn start(client: async_nats::Client, subjects: Subjects) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let publisher = tokio::spawn(async move {
            while let Some(Outbound { subject, body }) = rx.recv().await {
                if let Err(e) = client.publish(subject.clone(), body.into()).await {
                    warn!(subject, error = %e, "Failed to publish message");
                }
            }
            debug!("Publisher task finished");
        });
        let bus = Self {
            subjects,
            outbound: tx,
            listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
        };
        (bus, publisher)
    }

    /// Shared handle on the listener registrations, for the inbound task.
    pub fn listeners(&self) -> Arc<Mutex<ListenerRegistry>> {
        Arc::clone(&self.listeners)
    }
}

impl MessageBus for NatsBus {
    fn send(&self, recipient: Recipient, message: Message) {
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(e) => {
                warn!(kind = %message.kind, error = %e, "Failed to encode message");
                return;
            }
        };
        let subject = self.subjects.outbound(&recipient);
        debug!(subject, kind = %message.kind, "Queueing message");
        if self.outbound.send(Outbound { subject, body }).is_err() {
            warn!(kind = %message.kind, "Publisher stopped, message dropped");
        }
    }

    fn register_listener(&self, kind: MessageType) {
        let count = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind);
        debug!(%kind, count, "Listener registered");
    }

    fn deregister_listener(&self, kind: MessageType) {
        let count = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deregister(kind);
        debug!(%kind, count, "Listener deregistered");
    }
}

/// Decode an inbound payload and keep it only if someone listens for it.
///
/// # Errors
///
/// Returns the JSON error when the payload is not a [`Message`].
pub fn accept_inbound(
    payload: &[u8],
    listeners: &ListenerRegistry,
) -> Result<Option<Message>, serde_json::Error> {
    let message: Message = serde_json::from_slice(payload)?;
    if !message.kind.is_inbound() || !listeners.is_registered(message.kind) {
        return Ok(None);
    }
    Ok(Some(message))
}

/// Subscribe to participant messages and forward accepted ones to `tx`.
///
/// # Errors
///
/// Returns [`ServerError::Nats`] if the subscription fails.
pub async fn spawn_inbound(
    client: &async_nats::Client,
    subjects: &Subjects,
    listeners: Arc<Mutex<ListenerRegistry>>,
    tx: mpsc::Sender<Message>,
) -> Result<JoinHandle<()>, ServerError> {
    let subject = subjects.inbound();
    let mut sub = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| ServerError::Nats {
            message: format!("failed to subscribe to {subject}: {e}"),
        })?;
    info!(subject, "Listening for participant messages");

    Ok(tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            let accepted = {
                let registry = listeners.lock().unwrap_or_else(PoisonError::into_inner);
                accept_inbound(&msg.payload, &registry)
            };
            match accepted {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        debug!("Run loop gone, inbound task finished");
                        break;
                    }
                }
                Ok(None) => debug!(subject = %msg.subject, "No listener, message dropped"),
                Err(e) => warn!(subject = %msg.subject, error = %e, "Malformed participant message"),
            }
        }
    }))
}

/// Subscribe to mission requests and queue each one in `mailbox`.
///
/// # Errors
///
/// Returns [`ServerError::Nats`] if the subscription fails.
pub async fn spawn_mission_intake(
    client: &async_nats::Client,
    subjects: &Subjects,
    mailbox: Arc<MissionMailbox>,
) -> Result<JoinHandle<()>, ServerError> {
    let subject = subjects.mission_requests();
    let mut sub = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| ServerError::Nats {
            message: format!("failed to subscribe to {subject}: {e}"),
        })?;
    info!(subject, "Accepting mission requests");

    Ok(tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            match serde_json::from_slice::<MissionDescriptor>(&msg.payload) {
                Ok(descriptor) => {
                    info!(summary = %descriptor.summary, "Mission request received");
                    mailbox.deposit(Arc::new(descriptor));
                }
                Err(e) => warn!(error = %e, "Malformed mission request"),
            }
        }
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mission_types::keys;

    use super::*;

    #[test]
    fn subjects_follow_prefix() {
        let subjects = Subjects::new("mission.");
        assert_eq!(subjects.outbound(&Recipient::All), "mission.server.all");
        assert_eq!(
            subjects.outbound(&Recipient::Participant("AgentA".into())),
            "mission.server.to.AgentA"
        );
        assert_eq!(subjects.inbound(), "mission.participant.>");
        assert_eq!(subjects.mission_requests(), "mission.control.mission");
    }

    #[test]
    fn inbound_requires_registration() {
        let payload = serde_json::to_vec(
            &Message::new(MessageType::ParticipantAgentReady).with(keys::AGENT_NAME, "AgentA"),
        )
        .unwrap();

        let mut registry = ListenerRegistry::new();
        assert!(accept_inbound(&payload, &registry).unwrap().is_none());

        registry.register(MessageType::ParticipantAgentReady);
        let message = accept_inbound(&payload, &registry).unwrap().unwrap();
        assert_eq!(message.get(keys::AGENT_NAME), Some("AgentA"));
    }

    #[test]
    fn server_types_are_never_accepted() {
        let payload = serde_json::to_vec(&Message::new(MessageType::ServerAbort)).unwrap();
        let mut registry = ListenerRegistry::new();
        registry.register(MessageType::ServerAbort);
        assert!(accept_inbound(&payload, &registry).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(accept_inbound(b"not json", &ListenerRegistry::new()).is_err());
    }
}
