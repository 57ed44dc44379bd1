use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use mission_types::{GameMode, Message, MessageType, MissionDescriptor, Payload, Phase, keys};
use tracing::{debug, info, warn};

use crate::episode::{Episode, EpisodeContext, ErrorLatch, SpawnControl, abort_message};

/// Waits for every declared participant to report ready, then running.
///
/// Ready participants are parked in spectator mode until the whole cast has
/// joined, at which point each gets its declared game mode back and the
/// all-joined broadcast releases them.
pub(crate) struct AssemblyEpisode {
    latch: ErrorLatch,
    descriptor: Option<Arc<MissionDescriptor>>,
    /// Participant names still expected to report ready.
    pending_ready: BTreeSet<String>,
    /// Session users still expected to report running.
    pending_running: BTreeSet<String>,
    /// Session user to participant name, for everyone who reported ready.
    joined: BTreeMap<String, String>,
    cast_assembled: bool,
}

impl AssemblyEpisode {
    pub(crate) const fn new(descriptor: Option<Arc<MissionDescriptor>>) -> Self {
        Self {
            latch: ErrorLatch::new(),
            descriptor,
            pending_ready: BTreeSet::new(),
            pending_running: BTreeSet::new(),
            joined: BTreeMap::new(),
            cast_assembled: false,
        }
    }

    fn on_ready(&mut self, ctx: &mut EpisodeContext<'_>, message: &Message) {
        let (Some(name), Some(user)) = (message.get(keys::AGENT_NAME), message.get(keys::USERNAME))
        else {
            debug!(payload = ?message.payload, "Ready message without participant identity ignored");
            return;
        };
        if !self.pending_ready.remove(name) {
            warn!(participant = name, "Ready from unexpected or already-ready participant ignored");
            return;
        }

        self.prepare_participant(ctx, name, user);
        self.joined.insert(user.to_owned(), name.to_owned());
        self.pending_running.insert(user.to_owned());
        info!(
            participant = name,
            user,
            remaining = self.pending_ready.len(),
            "Participant ready"
        );

        if self.pending_ready.is_empty() {
            self.release_cast(ctx);
        }
    }

    fn on_running(&mut self, ctx: &mut EpisodeContext<'_>, message: &Message) {
        let Some(user) = message.get(keys::USERNAME) else {
            debug!(payload = ?message.payload, "Running message without user ignored");
            return;
        };
        if !self.pending_running.remove(user) {
            warn!(user, "Running from unexpected user ignored");
            return;
        }
        info!(user, remaining = self.pending_running.len(), "Participant running");
        self.check_all_running(ctx);
    }

    /// Put a newly ready participant at its start, with its kit, out of
    /// harm's way.
    fn prepare_participant(&self, ctx: &mut EpisodeContext<'_>, name: &str, user: &str) {
        let Some(spec) = self.descriptor.as_deref().and_then(|d| d.participant(name)) else {
            return;
        };
        let host = ctx.host();
        if !host.has_participant(user) {
            warn!(participant = name, user, "Ready participant is not connected to the host");
            return;
        }
        host.reset_vitals(user);
        if let Some(placement) = &spec.placement {
            host.place(user, placement);
        }
        if !spec.inventory.is_empty() {
            host.set_inventory(user, &spec.inventory);
        }
        host.set_game_mode(user, GameMode::Spectator);
    }

    /// Give every joined participant its declared game mode back.
    fn restore_game_modes(&self, ctx: &mut EpisodeContext<'_>) {
        let Some(descriptor) = self.descriptor.as_deref() else {
            return;
        };
        let host = ctx.host();
        for (user, name) in &self.joined {
            let Some(spec) = descriptor.participant(name) else {
                continue;
            };
            if host.has_participant(user) {
                host.set_game_mode(user, spec.mode);
                host.land(user);
            }
        }
    }

    fn release_cast(&mut self, ctx: &mut EpisodeContext<'_>) {
        self.cast_assembled = true;
        self.restore_game_modes(ctx);
        info!("All participants joined");
        ctx.broadcast(Message::new(MessageType::ServerAllJoined));
        self.check_all_running(ctx);
    }

    fn check_all_running(&self, ctx: &mut EpisodeContext<'_>) {
        if self.cast_assembled && self.pending_running.is_empty() {
            info!("All participants running");
            ctx.complete(Phase::Running);
        }
    }
}

impl Episode for AssemblyEpisode {
    fn phase(&self) -> Phase {
        Phase::AwaitingAssembly
    }

    fn listens_for(&self) -> &'static [MessageType] {
        &[
            MessageType::ParticipantAgentReady,
            MessageType::ParticipantAgentRunning,
        ]
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        let Some(descriptor) = self.descriptor.clone() else {
            ctx.record_error("no mission loaded");
            ctx.broadcast(abort_message("no mission loaded", None));
            ctx.complete(Phase::Error);
            return;
        };
        for name in descriptor.participant_names() {
            debug!(participant = name, "Waiting for participant");
            self.pending_ready.insert(name.to_owned());
        }
        if self.pending_ready.is_empty() {
            self.release_cast(ctx);
        }
    }

    fn on_message(&mut self, ctx: &mut EpisodeContext<'_>, message: &Message) {
        match message.kind {
            MessageType::ParticipantAgentReady => self.on_ready(ctx, message),
            MessageType::ParticipantAgentRunning => self.on_running(ctx, message),
            _ => {}
        }
    }

    fn on_error(&mut self, ctx: &mut EpisodeContext<'_>, payload: &Payload) {
        let participant = payload.get(keys::AGENT_NAME).map(String::as_str);
        let detail = payload
            .get(keys::MESSAGE)
            .map_or("participant bailed", String::as_str);
        warn!(participant, detail, "Participant bailed during assembly, aborting mission");
        self.restore_game_modes(ctx);
        ctx.record_error(detail);
        ctx.broadcast(abort_message(detail, participant));
        ctx.complete(Phase::Error);
    }

    fn error_latch(&self) -> Option<&ErrorLatch> {
        Some(&self.latch)
    }

    fn error_latch_mut(&mut self) -> Option<&mut ErrorLatch> {
        Some(&mut self.latch)
    }

    fn spawn_control(&self) -> Option<SpawnControl> {
        Some(SpawnControl)
    }
}
