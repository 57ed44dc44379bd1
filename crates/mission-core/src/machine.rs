//! The session state machine.
//!
//! [`StateMachine`] owns the current phase and its episode, the mission
//! session, and the mailbox. It is driven from outside by two entry points:
//!
//! - [`on_tick`](StateMachine::on_tick): runs the active episode's tick hook
//!   (unless it already completed), then applies pending transitions.
//! - [`on_message`](StateMachine::on_message): routes an inbound message to
//!   the active episode if it registered for the type.
//!
//! Phases only change on ticks, and by default at most once per tick. A
//! completion signaled from a message handler is applied on the next tick; a
//! completion signaled by a tick hook is applied on that tick. A completion
//! signaled by an entry action waits for the following tick unless
//! [`MachineConfig::max_chained_transitions`] allows longer chains.
//!
//! # Transition protocol
//!
//! 1. Broadcast a status line `"<prefix>: <PHASE>"`.
//! 2. Run the outgoing episode's cleanup and release its listeners.
//! 3. Reset the completion slot.
//! 4. Build the incoming episode for the phase, with a snapshot of the
//!    current descriptor, and register its listeners.
//! 5. Record the transition.
//! 6. Run the incoming episode's entry action.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mission_types::{
    Message, MessageType, MissionDescriptor, MissionId, Phase, SpawnDecision, TickPhase, keys,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::config::MachineConfig;
use crate::episode::{Episode, EpisodeContext};
use crate::episodes;
use crate::handlers::HandlerFactory;
use crate::host::WorldHost;
use crate::mailbox::MissionMailbox;
use crate::session::{Completion, MissionSession};

/// Category carried on status-line messages.
pub const STATUS_CATEGORY: &str = "server-state";

/// One applied phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    /// Phase that was left.
    pub from: Phase,
    /// Phase that was entered.
    pub to: Phase,
    /// Wall-clock time of the change.
    pub at: DateTime<Utc>,
    /// Mission current at the time of the change.
    pub mission_id: Option<MissionId>,
}

/// Point-in-time view of the machine, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    /// Current phase.
    pub phase: Phase,
    /// Current mission, if one is loaded.
    pub mission_id: Option<MissionId>,
    /// Summary of the current mission.
    pub mission_summary: Option<String>,
    /// Why the last run ended, once it has.
    pub quit_code: Option<String>,
    /// Detail of the last failure, until the next dormant phase.
    pub error_details: Option<String>,
    /// Phase the machine will move to on the next tick, if any.
    pub pending_transition: Option<Phase>,
    /// Whether a mission is waiting in the mailbox.
    pub mission_queued: bool,
    /// Summary of the mission waiting in the mailbox.
    pub queued_mission_summary: Option<String>,
    /// Current answer to the host's natural-spawn query.
    pub spawn_decision: SpawnDecision,
    /// Tick notifications received so far.
    pub ticks: u64,
    /// Most recent transitions, oldest first.
    pub recent_transitions: Vec<TransitionRecord>,
}

/// The server-side mission session state machine.
pub struct StateMachine {
    config: MachineConfig,
    phase: Phase,
    episode: Box<dyn Episode>,
    registered: Vec<MessageType>,
    completion: Completion,
    session: MissionSession,
    mailbox: Arc<MissionMailbox>,
    host: Box<dyn WorldHost>,
    bus: Arc<dyn MessageBus>,
    factory: Box<dyn HandlerFactory>,
    history: VecDeque<TransitionRecord>,
    ticks: u64,
    halted: bool,
}

impl StateMachine {
    /// Create a machine in [`Phase::Initializing`].
    pub fn new(
        config: MachineConfig,
        host: Box<dyn WorldHost>,
        bus: Arc<dyn MessageBus>,
        factory: Box<dyn HandlerFactory>,
    ) -> Self {
        let history = VecDeque::with_capacity(config.history_capacity);
        let mut machine = Self {
            config,
            phase: Phase::Initializing,
            episode: episodes::create(Phase::Initializing, None),
            registered: Vec::new(),
            completion: Completion::default(),
            session: MissionSession::default(),
            mailbox: Arc::new(MissionMailbox::new()),
            host,
            bus,
            factory,
            history,
            ticks: 0,
            halted: false,
        };
        machine.register_listeners();
        let (episode, mut ctx) = machine.split();
        episode.enter(&mut ctx);
        machine
    }

    /// Hand the machine a mission to run as soon as it first becomes
    /// dormant, ahead of anything in the mailbox.
    #[must_use]
    pub fn with_injected_mission(mut self, descriptor: MissionDescriptor) -> Self {
        self.session.injected = Some(Arc::new(descriptor));
        self
    }

    /// The current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The mailbox, for handing to other threads.
    pub const fn mailbox(&self) -> &Arc<MissionMailbox> {
        &self.mailbox
    }

    /// Queue a mission for the dormant phase. Replaces any mission queued
    /// earlier and not yet taken.
    pub fn request_mission_init(&self, descriptor: MissionDescriptor) {
        self.mailbox.deposit(Arc::new(descriptor));
    }

    /// Deliver a host tick.
    pub fn on_tick(&mut self, tick: TickPhase) {
        if self.halted {
            debug!(?tick, "Machine shut down, tick ignored");
            return;
        }
        self.ticks = self.ticks.saturating_add(1);
        if self.completion.pending().is_none() {
            let (episode, mut ctx) = self.split();
            episode.on_tick(&mut ctx, tick);
        }
        self.apply_pending_transitions();
    }

    /// Deliver an inbound participant message.
    ///
    /// Messages of types the active episode did not register for, and any
    /// message arriving after the episode completed, are dropped.
    pub fn on_message(&mut self, message: &Message) {
        let phase = self.phase;
        if self.halted {
            debug!(kind = %message.kind, "Machine shut down, message dropped");
            return;
        }
        if let Some(next) = self.completion.pending() {
            debug!(phase = %phase, next = %next, kind = %message.kind, "Phase completed, message dropped");
            return;
        }
        if !self.registered.contains(&message.kind) {
            debug!(phase = %phase, kind = %message.kind, "No listener for message type");
            return;
        }

        let (episode, mut ctx) = self.split();
        if message.kind == MessageType::ParticipantBailed {
            let Some(latch) = episode.error_latch_mut() else {
                return;
            };
            if !latch.latch(&message.payload) {
                debug!(phase = %phase, "Error already latched, bail report ignored");
                return;
            }
            warn!(
                phase = %phase,
                participant = message.get(keys::AGENT_NAME),
                detail = message.get(keys::MESSAGE),
                "Participant bailed"
            );
            episode.on_error(&mut ctx, &message.payload);
        } else {
            episode.on_message(&mut ctx, message);
        }
    }

    /// Leave the active phase without entering another.
    ///
    /// Runs the active episode's cleanup and releases its listeners. Ticks
    /// and messages delivered afterwards are ignored. Calling it again does
    /// nothing.
    pub fn shutdown(&mut self) {
        if self.halted {
            return;
        }
        info!(
            phase = %self.phase,
            mission_id = ?self.session.mission_id,
            "State machine shutting down"
        );
        {
            let (episode, mut ctx) = self.split();
            episode.cleanup(&mut ctx);
        }
        self.release_listeners();
        self.halted = true;
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub const fn is_shut_down(&self) -> bool {
        self.halted
    }

    /// Answer the host's natural-spawn query.
    pub fn spawn_decision(&self) -> SpawnDecision {
        self.episode
            .spawn_control()
            .map_or(SpawnDecision::Allow, |control| {
                control.decide(self.session.descriptor.as_deref())
            })
    }

    /// The descriptor of the current mission.
    pub fn descriptor(&self) -> Option<Arc<MissionDescriptor>> {
        self.session.descriptor.clone()
    }

    /// Identifier of the current mission.
    pub const fn mission_id(&self) -> Option<MissionId> {
        self.session.mission_id
    }

    /// Why the last run ended. Empty until a run has ended.
    pub fn quit_code(&self) -> &str {
        &self.session.quit_code
    }

    /// Detail of the last failure, until the next dormant phase.
    pub fn error_details(&self) -> Option<&str> {
        self.session.error_details.as_deref()
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    /// Tick notifications received so far.
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> MachineStatus {
        MachineStatus {
            phase: self.phase,
            mission_id: self.session.mission_id,
            mission_summary: self.session.descriptor.as_ref().map(|d| d.summary.clone()),
            quit_code: Some(self.session.quit_code.clone()).filter(|code| !code.is_empty()),
            error_details: self.session.error_details.clone(),
            pending_transition: self.completion.pending(),
            mission_queued: self.mailbox.is_occupied(),
            queued_mission_summary: self.mailbox.peek().map(|d| d.summary.clone()),
            spawn_decision: self.spawn_decision(),
            ticks: self.ticks,
            recent_transitions: self.history.iter().cloned().collect(),
        }
    }

    /// Lend the active episode and a context over the rest of the machine.
    fn split(&mut self) -> (&mut Box<dyn Episode>, EpisodeContext<'_>) {
        let ctx = EpisodeContext::new(
            self.phase,
            &mut *self.host,
            &*self.bus,
            &mut self.session,
            &self.mailbox,
            &*self.factory,
            &mut self.completion,
        );
        (&mut self.episode, ctx)
    }

    fn apply_pending_transitions(&mut self) {
        let mut applied: u32 = 0;
        while let Some(next) = self.completion.pending() {
            if applied >= self.config.max_chained_transitions.max(1) {
                debug!(
                    phase = %self.phase,
                    next = %next,
                    limit = self.config.max_chained_transitions,
                    "Transition deferred to next tick"
                );
                return;
            }
            self.transition(next);
            applied = applied.saturating_add(1);
        }
    }

    fn transition(&mut self, next: Phase) {
        let from = self.phase;
        info!(
            from = %from,
            to = %next,
            mission_id = ?self.session.mission_id,
            "Phase transition"
        );

        let status = Message::new(MessageType::ServerStatusText)
            .with(
                keys::TEXT,
                format!("{}: {}", self.config.status_prefix, next),
            )
            .with(keys::CATEGORY, STATUS_CATEGORY);
        self.bus.send_to_all(status);

        {
            let (episode, mut ctx) = self.split();
            episode.cleanup(&mut ctx);
        }
        self.release_listeners();

        self.completion = Completion::default();
        self.episode = episodes::create(next, self.session.descriptor.clone());
        self.phase = next;
        self.register_listeners();
        self.record(from, next);

        let (episode, mut ctx) = self.split();
        episode.enter(&mut ctx);
    }

    fn register_listeners(&mut self) {
        let mut kinds = self.episode.listens_for().to_vec();
        if self.episode.error_latch().is_some() {
            kinds.push(MessageType::ParticipantBailed);
        }
        for kind in &kinds {
            self.bus.register_listener(*kind);
        }
        self.registered = kinds;
    }

    fn release_listeners(&mut self) {
        for kind in self.registered.drain(..) {
            self.bus.deregister_listener(kind);
        }
    }

    fn record(&mut self, from: Phase, to: Phase) {
        if self.config.history_capacity == 0 {
            return;
        }
        while self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            from,
            to,
            at: Utc::now(),
            mission_id: self.session.mission_id,
        });
    }
}

impl core::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateMachine")
            .field("phase", &self.phase)
            .field("mission_id", &self.session.mission_id)
            .field("pending", &self.completion.pending())
            .field("ticks", &self.ticks)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use mission_types::{MessageType, Phase, SpawnDecision, TickPhase, keys};

    use super::*;
    use crate::bus::RecordingBus;
    use crate::handlers::DefaultHandlerFactory;
    use crate::host::RecordingHost;
    use crate::test_support::{Harness, descriptor, finished, ready, running, stopped};

    #[test]
    fn starts_initializing_without_listeners() {
        let h = Harness::new();
        assert_eq!(h.machine.phase(), Phase::Initializing);
        assert_eq!(h.machine.history().count(), 0);
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 0);
    }

    #[test]
    fn status_line_uses_configured_prefix() {
        let bus = Arc::new(RecordingBus::new());
        let config = MachineConfig {
            status_prefix: String::from("MALMO"),
            ..MachineConfig::default()
        };
        let mut machine = StateMachine::new(
            config,
            Box::new(RecordingHost::new()),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Box::new(DefaultHandlerFactory::new()),
        );
        machine.on_tick(TickPhase::Pre);

        let status = bus.sent_of(MessageType::ServerStatusText);
        let line = status.first().unwrap();
        assert_eq!(line.get(keys::TEXT), Some("MALMO: DORMANT"));
        assert_eq!(line.get(keys::CATEGORY), Some(STATUS_CATEGORY));
    }

    #[test]
    fn listeners_follow_the_active_episode() {
        let mut h = Harness::started();
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 1);
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentReady), 0);

        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentReady), 1);
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentRunning), 1);
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 1);

        h.machine.on_message(&ready("AgentA"));
        h.machine.on_message(&running("AgentA"));
        h.step();
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentReady), 0);
        assert_eq!(
            h.bus.listener_count(MessageType::ParticipantAgentFinishedMission),
            1
        );
    }

    #[test]
    fn message_completion_applies_on_next_tick() {
        let mut h = Harness::started();
        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();
        h.machine.on_message(&ready("AgentA"));
        h.machine.on_message(&running("AgentA"));

        assert_eq!(h.machine.phase(), Phase::AwaitingAssembly);
        assert_eq!(h.machine.status().pending_transition, Some(Phase::Running));
        h.machine.on_tick(TickPhase::Pre);
        assert_eq!(h.machine.phase(), Phase::Running);
    }

    #[test]
    fn messages_after_completion_are_dropped() {
        let mut h = Harness::started();
        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();
        h.machine.on_message(&ready("AgentA"));
        h.machine.on_message(&running("AgentA"));
        // Completed; this must not reach the running roster logic.
        h.machine.on_message(&finished("AgentA"));
        h.step();
        h.step();
        assert_eq!(h.machine.phase(), Phase::Running);
    }

    #[test]
    fn unregistered_types_are_dropped() {
        let mut h = Harness::started();
        h.machine.on_message(&stopped("AgentA"));
        h.step();
        assert_eq!(h.machine.phase(), Phase::Dormant);
    }

    #[test]
    fn spawn_decision_follows_phase_and_descriptor() {
        let mut h = Harness::new();
        assert_eq!(h.machine.spawn_decision(), SpawnDecision::Allow);

        h.step();
        assert_eq!(h.machine.spawn_decision(), SpawnDecision::Deny);

        let mut d = descriptor(&["AgentA"]);
        d.conditions.allow_spawning = Some(false);
        h.machine.request_mission_init(d);
        h.step();
        assert_eq!(h.machine.spawn_decision(), SpawnDecision::Deny);

        let mut h = Harness::started();
        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();
        assert_eq!(h.machine.spawn_decision(), SpawnDecision::Allow);
    }

    fn machine_with(config: MachineConfig) -> (StateMachine, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        let machine = StateMachine::new(
            config,
            Box::new(RecordingHost::new()),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Box::new(DefaultHandlerFactory::new()),
        );
        (machine, bus)
    }

    #[test]
    fn injected_mission_wins_over_queued() {
        let mut injected = descriptor(&["AgentA"]);
        injected.summary = String::from("injected");
        let (machine, _bus) = machine_with(MachineConfig::default());
        let mut machine = machine.with_injected_mission(injected);

        machine.on_tick(TickPhase::Pre);
        assert_eq!(machine.phase(), Phase::Dormant);
        assert_eq!(machine.status().pending_transition, Some(Phase::BuildingWorld));

        let mut queued = descriptor(&["AgentB"]);
        queued.summary = String::from("queued");
        machine.request_mission_init(queued);
        machine.on_tick(TickPhase::Post);

        assert_eq!(machine.phase(), Phase::BuildingWorld);
        assert_eq!(machine.descriptor().unwrap().summary, "injected");
        assert!(machine.mailbox().is_occupied());
        assert_eq!(
            machine.status().queued_mission_summary.as_deref(),
            Some("queued")
        );
    }

    #[test]
    fn history_is_bounded() {
        let (mut machine, _bus) = machine_with(MachineConfig {
            history_capacity: 2,
            ..MachineConfig::default()
        });
        machine.on_tick(TickPhase::Pre);
        machine.request_mission_init(descriptor(&["AgentA"]));
        machine.on_tick(TickPhase::Pre);
        machine.on_tick(TickPhase::Post);

        let kept: Vec<Phase> = machine.history().map(|r| r.to).collect();
        assert_eq!(kept, vec![Phase::BuildingWorld, Phase::AwaitingAssembly]);
    }

    #[test]
    fn one_transition_per_tick_by_default() {
        let (mut machine, bus) = machine_with(MachineConfig::default());
        machine.on_tick(TickPhase::Pre);
        let mut d = descriptor(&["AgentA"]);
        d.quit.time_limit_ticks = Some(0);
        machine.request_mission_init(d);

        let mut seen = Vec::new();
        for tick in [TickPhase::Pre, TickPhase::Post, TickPhase::Pre, TickPhase::Post] {
            machine.on_tick(tick);
            seen.push(machine.phase());
        }
        assert_eq!(
            seen,
            vec![
                Phase::BuildingWorld,
                Phase::Error,
                Phase::Cleanup,
                Phase::Dormant
            ]
        );
        assert_eq!(bus.sent_of(MessageType::ServerAbort).len(), 1);
    }

    #[test]
    fn longer_chains_are_opt_in() {
        let (mut machine, bus) = machine_with(MachineConfig {
            max_chained_transitions: 16,
            ..MachineConfig::default()
        });
        machine.on_tick(TickPhase::Pre);
        let mut d = descriptor(&["AgentA"]);
        d.quit.time_limit_ticks = Some(0);
        machine.request_mission_init(d);

        machine.on_tick(TickPhase::Pre);
        assert_eq!(machine.phase(), Phase::Dormant);
        let visited: Vec<Phase> = machine.history().map(|r| r.to).collect();
        assert_eq!(
            visited,
            vec![
                Phase::Dormant,
                Phase::BuildingWorld,
                Phase::Error,
                Phase::Cleanup,
                Phase::Dormant
            ]
        );
        assert_eq!(bus.sent_of(MessageType::ServerAbort).len(), 1);
    }

    #[test]
    fn zero_chain_limit_still_moves() {
        let (mut machine, _bus) = machine_with(MachineConfig {
            max_chained_transitions: 0,
            ..MachineConfig::default()
        });
        machine.on_tick(TickPhase::Post);
        assert_eq!(machine.phase(), Phase::Dormant);
    }

    #[test]
    fn shutdown_releases_listeners_and_ignores_later_input() {
        let mut h = Harness::started();
        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentReady), 1);

        h.machine.shutdown();
        assert!(h.machine.is_shut_down());
        assert_eq!(h.bus.listener_count(MessageType::ParticipantAgentReady), 0);
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 0);

        let ticks = h.machine.status().ticks;
        h.machine.on_message(&ready("AgentA"));
        h.step();
        assert_eq!(h.machine.phase(), Phase::AwaitingAssembly);
        assert_eq!(h.machine.status().ticks, ticks);
        assert!(h.host.snapshot().vitals_reset.is_empty());

        h.machine.shutdown();
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 0);
    }

    #[test]
    fn status_snapshot_serializes() {
        let mut h = Harness::started();
        h.machine.request_mission_init(descriptor(&["AgentA"]));
        h.step();

        let status = h.machine.status();
        assert_eq!(status.phase, Phase::AwaitingAssembly);
        assert_eq!(status.mission_summary.as_deref(), Some("Test mission"));
        assert!(status.quit_code.is_none());
        assert!(!status.mission_queued);
        assert!(status.queued_mission_summary.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "AWAITING_ASSEMBLY");
        assert_eq!(json["spawn_decision"], "allow");
    }
}
