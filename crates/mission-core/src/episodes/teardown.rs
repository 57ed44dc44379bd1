use mission_types::Phase;
use tracing::error;

use crate::episode::{Episode, EpisodeContext};

/// Reports the failure and moves straight on to cleanup.
pub(crate) struct ErrorEpisode;

impl Episode for ErrorEpisode {
    fn phase(&self) -> Phase {
        Phase::Error
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        let details = ctx.error_details().unwrap_or("no details recorded");
        error!(mission_id = ?ctx.mission_id(), details, "Mission failed");
        ctx.complete(Phase::Cleanup);
    }
}

/// Drops the mission and returns to dormant.
pub(crate) struct CleanupEpisode;

impl Episode for CleanupEpisode {
    fn phase(&self) -> Phase {
        Phase::Cleanup
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        ctx.end_mission();
        ctx.complete(Phase::Dormant);
    }
}
