use mission_types::{Phase, TickPhase};
use tracing::info;

use crate::episode::{Episode, EpisodeContext};

/// Waits for the host to start ticking.
pub(crate) struct InitializeEpisode;

impl Episode for InitializeEpisode {
    fn phase(&self) -> Phase {
        Phase::Initializing
    }

    fn on_tick(&mut self, ctx: &mut EpisodeContext<'_>, _tick: TickPhase) {
        info!("Host is ticking, server ready for missions");
        ctx.complete(Phase::Dormant);
    }
}
