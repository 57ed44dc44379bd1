use std::sync::Arc;

use mission_types::{MissionDescriptor, Payload, Phase, TickPhase, keys};
use tracing::{error, info, warn};

use crate::episode::{Episode, EpisodeContext, ErrorLatch, SpawnControl, abort_message};
use crate::host::WeatherDurations;

/// Builds the world for the accepted mission, then applies its weather.
///
/// A successful build moves on to assembly at the next tick, so a bail
/// reported in between still aborts the mission.
pub(crate) struct BuildWorldEpisode {
    latch: ErrorLatch,
    descriptor: Option<Arc<MissionDescriptor>>,
    built: bool,
}

impl BuildWorldEpisode {
    pub(crate) const fn new(descriptor: Option<Arc<MissionDescriptor>>) -> Self {
        Self {
            latch: ErrorLatch::new(),
            descriptor,
            built: false,
        }
    }

    fn fail(ctx: &mut EpisodeContext<'_>, detail: &str) {
        error!(detail, "World build failed, aborting mission");
        ctx.record_error(detail);
        ctx.broadcast(abort_message(detail, None));
        ctx.complete(Phase::Error);
    }
}

impl Episode for BuildWorldEpisode {
    fn phase(&self) -> Phase {
        Phase::BuildingWorld
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        let Some(descriptor) = self.descriptor.clone() else {
            Self::fail(ctx, "no mission loaded");
            return;
        };
        if let Err(detail) = ctx.build_world() {
            Self::fail(ctx, &detail);
            return;
        }

        let max = ctx.host().max_weather_duration();
        if let Some(weather) = WeatherDurations::for_request(descriptor.conditions.weather, max) {
            ctx.host().set_weather(weather);
        }
        info!(summary = %descriptor.summary, "World built");
        self.built = true;
    }

    fn on_tick(&mut self, ctx: &mut EpisodeContext<'_>, _tick: TickPhase) {
        if self.built {
            ctx.complete(Phase::AwaitingAssembly);
        }
    }

    fn on_error(&mut self, ctx: &mut EpisodeContext<'_>, payload: &Payload) {
        let participant = payload.get(keys::AGENT_NAME).map(String::as_str);
        let detail = payload
            .get(keys::MESSAGE)
            .map_or("participant bailed", String::as_str);
        warn!(participant, detail, "Participant bailed while the world was being built");
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
