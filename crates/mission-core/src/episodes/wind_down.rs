use std::collections::BTreeMap;
use std::sync::Arc;

use mission_types::{Message, MessageType, MissionDescriptor, Payload, Phase, keys};
use tracing::{debug, info, warn};

use crate::episode::{Episode, EpisodeContext, ErrorLatch, SpawnControl, abort_message};

/// Asks every participant to stop and waits until they all have.
pub(crate) struct AwaitQuitEpisode {
    latch: ErrorLatch,
    descriptor: Option<Arc<MissionDescriptor>>,
    /// Participant name to whether it has reported stopping.
    stopped: BTreeMap<String, bool>,
}

impl AwaitQuitEpisode {
    pub(crate) const fn new(descriptor: Option<Arc<MissionDescriptor>>) -> Self {
        Self {
            latch: ErrorLatch::new(),
            descriptor,
            stopped: BTreeMap::new(),
        }
    }

    fn check_all_stopped(&self, ctx: &mut EpisodeContext<'_>) {
        if self.stopped.values().all(|stopped| *stopped) {
            info!("All participants stopped, mission over");
            ctx.broadcast(Message::new(MessageType::ServerMissionOver));
            ctx.complete(Phase::Cleanup);
        }
    }
}

impl Episode for AwaitQuitEpisode {
    fn phase(&self) -> Phase {
        Phase::AwaitingQuit
    }

    fn listens_for(&self) -> &'static [MessageType] {
        &[MessageType::ParticipantAgentStopped]
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        let stop = Message::new(MessageType::ServerStopParticipants)
            .with(keys::QUIT_CODE, ctx.quit_code());
        ctx.broadcast(stop);

        if let Some(descriptor) = &self.descriptor {
            self.stopped = descriptor
                .participant_names()
                .map(|name| (name.to_owned(), false))
                .collect();
        }
        self.check_all_stopped(ctx);
    }

    fn on_message(&mut self, ctx: &mut EpisodeContext<'_>, message: &Message) {
        let Some(name) = message.get(keys::AGENT_NAME) else {
            debug!(payload = ?message.payload, "Stopped message without participant ignored");
            return;
        };
        match self.stopped.get_mut(name) {
            Some(stopped) => *stopped = true,
            None => {
                debug!(participant = name, "Stopped from unknown participant ignored");
                return;
            }
        }
        info!(participant = name, "Participant stopped");
        self.check_all_stopped(ctx);
    }

    fn on_error(&mut self, ctx: &mut EpisodeContext<'_>, payload: &Payload) {
        let participant = payload.get(keys::AGENT_NAME).map(String::as_str);
        let detail = payload
            .get(keys::MESSAGE)
            .map_or("participant bailed", String::as_str);
        warn!(participant, detail, "Participant bailed while stopping, aborting mission");
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
