use std::sync::Arc;

use mission_types::{MissionDescriptor, Phase, TickPhase};
use tracing::{info, warn};

use crate::episode::{Episode, EpisodeContext, ErrorLatch, SpawnControl};

/// Idle, waiting for a mission.
///
/// A descriptor injected at construction is processed on entry. Otherwise
/// the mailbox is polled on every tick and the first descriptor found is
/// accepted.
pub(crate) struct DormantEpisode {
    latch: ErrorLatch,
}

impl DormantEpisode {
    pub(crate) const fn new() -> Self {
        Self {
            latch: ErrorLatch::new(),
        }
    }

    fn accept(ctx: &mut EpisodeContext<'_>, descriptor: Arc<MissionDescriptor>) {
        info!(summary = %descriptor.summary, "Mission received");
        let source = descriptor.source_address.as_deref().unwrap_or("unknown");
        let host = ctx.host();
        host.send_chat(&format!("Received mission: {}", descriptor.summary));
        host.send_chat(&format!("Source: {source}"));
        ctx.begin_mission(descriptor);
        ctx.complete(Phase::BuildingWorld);
    }
}

impl Episode for DormantEpisode {
    fn phase(&self) -> Phase {
        Phase::Dormant
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        // Anything queued before we got here belongs to a mission that was
        // already abandoned.
        if let Some(stale) = ctx.take_queued_mission() {
            warn!(summary = %stale.summary, "Discarding stale queued mission");
        }
        self.latch.clear();
        ctx.clear_error_details();

        if let Some(descriptor) = ctx.take_injected_mission() {
            info!("Processing mission injected at startup");
            Self::accept(ctx, descriptor);
        }
    }

    fn on_tick(&mut self, ctx: &mut EpisodeContext<'_>, _tick: TickPhase) {
        if let Some(descriptor) = ctx.take_queued_mission() {
            Self::accept(ctx, descriptor);
        }
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
