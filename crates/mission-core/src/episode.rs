//! The episode framework.
//!
//! An [`Episode`] is the behavior of one phase instance. The machine builds
//! a fresh episode every time a phase is entered, calls
//! [`enter`](Episode::enter) once, forwards ticks and messages while the
//! episode is active, and calls [`cleanup`](Episode::cleanup) once when
//! leaving.
//!
//! Episodes never hold a reference to the machine. Everything they may touch
//! is lent to them through an [`EpisodeContext`]: the host, the bus, the
//! mission session, and the single "request transition" handle
//! ([`EpisodeContext::complete`]).
//!
//! Two optional capabilities are composed in rather than inherited:
//!
//! - [`ErrorLatch`]: the episode wants to hear about participant bails. The
//!   machine registers for `participant-bailed`, latches the first report,
//!   and then calls [`Episode::on_error`].
//! - [`SpawnControl`]: the episode answers the host's natural-spawn query
//!   from the loaded descriptor.

use std::sync::Arc;

use mission_types::{
    Message, MessageType, MissionDescriptor, MissionId, Payload, Phase, SpawnDecision, TickPhase,
    keys,
};
use tracing::{debug, error, info};

use crate::bus::MessageBus;
use crate::handlers::HandlerFactory;
use crate::host::WorldHost;
use crate::mailbox::MissionMailbox;
use crate::session::{Completion, MissionSession};

/// Behavior of one phase instance.
///
/// Every hook has a no-op default; an episode overrides the ones its phase
/// needs.
pub trait Episode: Send {
    /// The phase this episode implements.
    fn phase(&self) -> Phase;

    /// Message types delivered to [`on_message`](Self::on_message).
    fn listens_for(&self) -> &'static [MessageType] {
        &[]
    }

    /// Entry action, run synchronously as the last step of a transition.
    fn enter(&mut self, _ctx: &mut EpisodeContext<'_>) {}

    /// Called for every host tick while the episode is active.
    fn on_tick(&mut self, _ctx: &mut EpisodeContext<'_>, _tick: TickPhase) {}

    /// Called for every inbound message of a type in
    /// [`listens_for`](Self::listens_for).
    fn on_message(&mut self, _ctx: &mut EpisodeContext<'_>, _message: &Message) {}

    /// Called once, after the first participant bail was latched.
    fn on_error(&mut self, _ctx: &mut EpisodeContext<'_>, _payload: &Payload) {}

    /// Called once when the episode is left.
    fn cleanup(&mut self, _ctx: &mut EpisodeContext<'_>) {}

    /// The error latch, for episodes that react to participant bails.
    fn error_latch(&self) -> Option<&ErrorLatch> {
        None
    }

    /// Mutable access to the error latch.
    fn error_latch_mut(&mut self) -> Option<&mut ErrorLatch> {
        None
    }

    /// The spawn-control component, for episodes that gate natural spawns.
    fn spawn_control(&self) -> Option<SpawnControl> {
        None
    }
}

/// Records the first participant failure reported during a phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLatch {
    payload: Option<Payload>,
}

impl ErrorLatch {
    /// An unset latch.
    pub const fn new() -> Self {
        Self { payload: None }
    }

    /// Latch a failure report. Returns `false` if one was already latched;
    /// the first payload is kept.
    pub fn latch(&mut self, payload: &Payload) -> bool {
        if self.payload.is_some() {
            return false;
        }
        self.payload = Some(payload.clone());
        true
    }

    /// Whether a failure has been latched.
    pub const fn has_error(&self) -> bool {
        self.payload.is_some()
    }

    /// The latched payload.
    pub const fn error_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Reset to unset.
    pub fn clear(&mut self) {
        self.payload = None;
    }
}

/// Answers natural-spawn queries from the loaded descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnControl;

impl SpawnControl {
    /// Spawns follow the descriptor; with no mission loaded they are denied.
    pub fn decide(self, descriptor: Option<&MissionDescriptor>) -> SpawnDecision {
        descriptor.map_or(SpawnDecision::Deny, MissionDescriptor::spawn_decision)
    }
}

/// Build the abort message sent to participants when a mission fails.
///
/// `detail` goes into the `message` key; the reporting participant, when
/// known, into `agentname`.
pub fn abort_message(detail: &str, participant: Option<&str>) -> Message {
    let message = Message::new(MessageType::ServerAbort).with(keys::MESSAGE, detail);
    match participant {
        Some(name) => message.with(keys::AGENT_NAME, name),
        None => message,
    }
}

/// Everything an episode may touch while one of its hooks runs.
pub struct EpisodeContext<'a> {
    phase: Phase,
    host: &'a mut dyn WorldHost,
    bus: &'a dyn MessageBus,
    session: &'a mut MissionSession,
    mailbox: &'a MissionMailbox,
    factory: &'a dyn HandlerFactory,
    completion: &'a mut Completion,
}

impl<'a> EpisodeContext<'a> {
    pub(crate) fn new(
        phase: Phase,
        host: &'a mut dyn WorldHost,
        bus: &'a dyn MessageBus,
        session: &'a mut MissionSession,
        mailbox: &'a MissionMailbox,
        factory: &'a dyn HandlerFactory,
        completion: &'a mut Completion,
    ) -> Self {
        Self {
            phase,
            host,
            bus,
            session,
            mailbox,
            factory,
            completion,
        }
    }

    /// Signal that the episode is done and the machine should move to
    /// `next`. A signal from a tick or message hook is applied on the current
    /// or next tick; one from an entry action waits for the next tick unless
    /// the machine allows chained transitions. Only the first signal of a
    /// phase instance counts; later ones return `false`.
    pub fn complete(&mut self, next: Phase) -> bool {
        let accepted = self.completion.signal(self.phase, next);
        if accepted {
            debug!(phase = %self.phase, next = %next, "Episode completed");
        }
        accepted
    }

    /// The world host.
    pub fn host(&mut self) -> &mut dyn WorldHost {
        &mut *self.host
    }

    /// Send a message to every participant.
    pub fn broadcast(&self, message: Message) {
        self.bus.send_to_all(message);
    }

    /// Identifier of the current mission.
    pub const fn mission_id(&self) -> Option<MissionId> {
        self.session.mission_id
    }

    /// Take the descriptor injected at construction, if still unused.
    pub fn take_injected_mission(&mut self) -> Option<Arc<MissionDescriptor>> {
        self.session.injected.take()
    }

    /// Take the descriptor waiting in the mailbox.
    pub fn take_queued_mission(&self) -> Option<Arc<MissionDescriptor>> {
        self.mailbox.take()
    }

    /// Accept a mission: store its descriptor, assign an id and build its
    /// behavior handlers.
    ///
    /// A handler failure does not stop the mission here; it is kept and
    /// reported by [`build_world`](Self::build_world).
    pub fn begin_mission(&mut self, descriptor: Arc<MissionDescriptor>) -> MissionId {
        let id = MissionId::new();
        match self.factory.create(&descriptor) {
            Ok(handlers) => {
                self.session.handlers = Some(handlers);
                self.session.handler_failure = None;
            }
            Err(e) => {
                error!(mission_id = %id, error = %e, "Could not create behavior handlers");
                self.session.handlers = None;
                self.session.handler_failure = Some(e.to_string());
            }
        }
        info!(mission_id = %id, summary = %descriptor.summary, "Mission accepted");
        self.session.descriptor = Some(descriptor);
        self.session.mission_id = Some(id);
        self.session.quit_code.clear();
        id
    }

    /// Build the world through the mission's decorator.
    ///
    /// # Errors
    ///
    /// Returns the failure detail when handlers could not be created for
    /// this mission, or when the decorator fails.
    pub fn build_world(&mut self) -> Result<(), String> {
        if let Some(failure) = &self.session.handler_failure {
            return Err(failure.clone());
        }
        let Some(descriptor) = self.session.descriptor.as_deref() else {
            return Err(String::from("no mission loaded"));
        };
        let decorator = self
            .session
            .handlers
            .as_mut()
            .and_then(|h| h.world_decorator.as_mut());
        match decorator {
            Some(decorator) => decorator
                .build_on_world(descriptor, &mut *self.host)
                .map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }

    /// Let the world decorator update the world.
    pub fn update_world(&mut self) {
        if let Some(decorator) = self
            .session
            .handlers
            .as_mut()
            .and_then(|h| h.world_decorator.as_mut())
        {
            decorator.update(&mut *self.host);
        }
    }

    /// Reset the quit evaluator for a new running phase.
    pub fn prepare_quit_evaluator(&mut self) {
        let Some(descriptor) = self.session.descriptor.as_deref() else {
            return;
        };
        if let Some(quit) = self
            .session
            .handlers
            .as_mut()
            .and_then(|h| h.quit_evaluator.as_mut())
        {
            quit.prepare(descriptor);
        }
    }

    /// Poll the quit evaluator. Returns its outcome when it wants to quit.
    pub fn evaluate_quit(&mut self) -> Option<String> {
        let descriptor = self.session.descriptor.as_deref()?;
        let quit = self
            .session
            .handlers
            .as_mut()
            .and_then(|h| h.quit_evaluator.as_mut())?;
        quit.wants_to_quit(descriptor).then(|| quit.outcome())
    }

    /// Release whatever the quit evaluator holds.
    pub fn cleanup_quit_evaluator(&mut self) {
        if let Some(quit) = self
            .session
            .handlers
            .as_mut()
            .and_then(|h| h.quit_evaluator.as_mut())
        {
            quit.cleanup();
        }
    }

    /// Record why the running phase ended.
    pub fn set_quit_code(&mut self, code: impl Into<String>) {
        self.session.quit_code = code.into();
    }

    /// Why the running phase ended. Empty until it has.
    pub fn quit_code(&self) -> &str {
        &self.session.quit_code
    }

    /// Record a mission failure detail for the error phase to report.
    pub fn record_error(&mut self, detail: impl Into<String>) {
        self.session.error_details = Some(detail.into());
    }

    /// The recorded failure detail.
    pub fn error_details(&self) -> Option<&str> {
        self.session.error_details.as_deref()
    }

    /// Forget the recorded failure detail.
    pub fn clear_error_details(&mut self) {
        self.session.error_details = None;
    }

    /// Drop the descriptor and handlers of the current mission.
    pub fn end_mission(&mut self) {
        if let Some(id) = self.session.mission_id {
            info!(mission_id = %id, "Mission ended");
        }
        self.session.end_mission();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::RecordingBus;
    use crate::handlers::{BehaviorHandlers, DefaultHandlerFactory, HandlerError};
    use crate::host::RecordingHost;
    use crate::test_support::descriptor;

    #[test]
    fn latch_keeps_first_payload() {
        let mut latch = ErrorLatch::new();
        let first = Payload::from([(keys::MESSAGE.to_owned(), "first".to_owned())]);
        let second = Payload::from([(keys::MESSAGE.to_owned(), "second".to_owned())]);

        assert!(latch.latch(&first));
        assert!(!latch.latch(&second));
        assert!(latch.has_error());
        assert_eq!(latch.error_payload(), Some(&first));

        latch.clear();
        assert!(!latch.has_error());
    }

    #[test]
    fn spawn_control_denies_without_mission() {
        let control = SpawnControl;
        assert_eq!(control.decide(None), SpawnDecision::Deny);

        let mut d = descriptor(&[]);
        assert_eq!(control.decide(Some(&d)), SpawnDecision::Allow);
        d.conditions.allow_spawning = Some(false);
        assert_eq!(control.decide(Some(&d)), SpawnDecision::Deny);
    }

    #[test]
    fn abort_message_carries_detail_and_participant() {
        let msg = abort_message("boom", Some("AgentA"));
        assert_eq!(msg.kind, MessageType::ServerAbort);
        assert_eq!(msg.get(keys::MESSAGE), Some("boom"));
        assert_eq!(msg.get(keys::AGENT_NAME), Some("AgentA"));
        assert_eq!(abort_message("boom", None).get(keys::AGENT_NAME), None);
    }

    #[test]
    fn context_completion_is_first_wins() {
        let mut host = RecordingHost::new();
        let bus = RecordingBus::new();
        let mut session = MissionSession::default();
        let mailbox = MissionMailbox::new();
        let factory = DefaultHandlerFactory::new();
        let mut completion = Completion::default();
        let mut ctx = EpisodeContext::new(
            Phase::Running,
            &mut host,
            &bus,
            &mut session,
            &mailbox,
            &factory,
            &mut completion,
        );

        assert!(ctx.complete(Phase::AwaitingQuit));
        assert!(!ctx.complete(Phase::Error));
        assert_eq!(completion.pending(), Some(Phase::AwaitingQuit));
    }

    #[test]
    fn handler_failure_surfaces_in_build_world() {
        let mut host = RecordingHost::new();
        let bus = RecordingBus::new();
        let mut session = MissionSession::default();
        let mailbox = MissionMailbox::new();
        let factory = |_: &MissionDescriptor| -> Result<BehaviorHandlers, HandlerError> {
            Err(HandlerError::InvalidQuitConditions {
                reason: "bad".into(),
            })
        };
        let mut completion = Completion::default();
        let mut ctx = EpisodeContext::new(
            Phase::Dormant,
            &mut host,
            &bus,
            &mut session,
            &mailbox,
            &factory,
            &mut completion,
        );

        ctx.begin_mission(Arc::new(descriptor(&["AgentA"])));
        assert!(ctx.mission_id().is_some());
        let err = ctx.build_world().unwrap_err();
        assert!(err.contains("bad"));

        ctx.end_mission();
        assert!(ctx.mission_id().is_none());
        assert!(session.descriptor.is_none());
        assert!(session.handler_failure.is_none());
    }
}
