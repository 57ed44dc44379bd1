use std::collections::BTreeSet;
use std::sync::Arc;

use mission_types::{Message, MessageType, MissionDescriptor, Phase, TickPhase, keys};
use tracing::{debug, info, warn};

use crate::episode::{Episode, EpisodeContext, ErrorLatch, SpawnControl, abort_message};

/// Quit code used when every participant has reported finishing.
pub(crate) const ALL_PARTICIPANTS_FINISHED: &str = "All agents finished";

/// The live mission.
///
/// Ends when the quit evaluator fires or when every participant has
/// reported finishing, whichever is seen first on a POST tick. A latched
/// participant bail is picked up on the next POST tick as well.
pub(crate) struct RunningEpisode {
    latch: ErrorLatch,
    descriptor: Option<Arc<MissionDescriptor>>,
    /// Participants that have not reported finishing yet.
    still_running: BTreeSet<String>,
}

impl RunningEpisode {
    pub(crate) fn new(descriptor: Option<Arc<MissionDescriptor>>) -> Self {
        let still_running = descriptor
            .as_deref()
            .map(|d| d.participant_names().map(str::to_owned).collect())
            .unwrap_or_default();
        Self {
            latch: ErrorLatch::new(),
            descriptor,
            still_running,
        }
    }

    fn finish(ctx: &mut EpisodeContext<'_>, quit_code: String) {
        info!(quit_code = %quit_code, "Mission run ended");
        ctx.set_quit_code(quit_code);
        ctx.complete(Phase::AwaitingQuit);
    }

    fn abort(&self, ctx: &mut EpisodeContext<'_>) {
        let payload = self.latch.error_payload();
        let participant = payload.and_then(|p| p.get(keys::AGENT_NAME)).map(String::as_str);
        let detail = payload
            .and_then(|p| p.get(keys::MESSAGE))
            .map_or("participant bailed", String::as_str);
        warn!(participant, detail, "Participant bailed while running, aborting mission");
        ctx.record_error(detail);
        ctx.broadcast(abort_message(detail, participant));
        ctx.complete(Phase::Error);
    }
}

impl Episode for RunningEpisode {
    fn phase(&self) -> Phase {
        Phase::Running
    }

    fn listens_for(&self) -> &'static [MessageType] {
        &[MessageType::ParticipantAgentFinishedMission]
    }

    fn enter(&mut self, ctx: &mut EpisodeContext<'_>) {
        if let Some(time) = self.descriptor.as_deref().and_then(|d| d.conditions.time) {
            ctx.host()
                .set_time_policy(time.allows_passage(), time.start_time);
        }
        ctx.prepare_quit_evaluator();
        info!(
            participants = self.still_running.len(),
            "Mission running"
        );
    }

    fn on_tick(&mut self, ctx: &mut EpisodeContext<'_>, tick: TickPhase) {
        if tick != TickPhase::Post {
            return;
        }
        if self.latch.has_error() {
            self.abort(ctx);
            return;
        }

        ctx.update_world();
        if let Some(outcome) = ctx.evaluate_quit() {
            Self::finish(ctx, outcome);
        } else if self.still_running.is_empty() {
            Self::finish(ctx, ALL_PARTICIPANTS_FINISHED.to_owned());
        }
    }

    fn on_message(&mut self, _ctx: &mut EpisodeContext<'_>, message: &Message) {
        let Some(name) = message.get(keys::AGENT_NAME) else {
            debug!(payload = ?message.payload, "Finished message without participant ignored");
            return;
        };
        if self.still_running.remove(name) {
            info!(
                participant = name,
                remaining = self.still_running.len(),
                "Participant finished"
            );
        } else {
            debug!(participant = name, "Finished from unknown participant ignored");
        }
    }

    fn cleanup(&mut self, ctx: &mut EpisodeContext<'_>) {
        ctx.cleanup_quit_evaluator();
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex, PoisonError};

    use mission_types::{MessageType, MissionDescriptor, Phase, TimePolicy, TickPhase, keys};

    use super::ALL_PARTICIPANTS_FINISHED;
    use crate::handlers::{
        BehaviorHandlers, DecoratorError, HandlerError, QuitEvaluator, WorldDecorator,
    };
    use crate::host::WorldHost;
    use crate::test_support::{Harness, bailed, descriptor, finished, ready, running};

    fn run(h: &mut Harness, d: MissionDescriptor) {
        let names: Vec<String> = d.participant_names().map(str::to_owned).collect();
        h.machine.request_mission_init(d);
        h.step();
        for name in &names {
            h.machine.on_message(&ready(name));
        }
        for name in &names {
            h.machine.on_message(&running(name));
        }
        h.step();
        assert_eq!(h.machine.phase(), Phase::Running);
    }

    #[derive(Default)]
    struct Calls {
        prepared: u32,
        cleaned: u32,
        updates: u32,
    }

    struct Scripted {
        calls: Arc<Mutex<Calls>>,
        quit_after: u32,
        polls: u32,
    }

    impl QuitEvaluator for Scripted {
        fn prepare(&mut self, _descriptor: &MissionDescriptor) {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.prepared = calls.prepared.saturating_add(1);
        }

        fn wants_to_quit(&mut self, _descriptor: &MissionDescriptor) -> bool {
            self.polls = self.polls.saturating_add(1);
            self.polls >= self.quit_after
        }

        fn outcome(&self) -> String {
            String::from("Goal reached")
        }

        fn cleanup(&mut self) {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.cleaned = calls.cleaned.saturating_add(1);
        }
    }

    struct Counting(Arc<Mutex<Calls>>);

    impl WorldDecorator for Counting {
        fn build_on_world(
            &mut self,
            _descriptor: &MissionDescriptor,
            _host: &mut dyn WorldHost,
        ) -> Result<(), DecoratorError> {
            Ok(())
        }

        fn update(&mut self, _host: &mut dyn WorldHost) {
            let mut calls = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            calls.updates = calls.updates.saturating_add(1);
        }
    }

    fn scripted(quit_after: u32) -> (Harness, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let shared = Arc::clone(&calls);
        let factory = move |_: &MissionDescriptor| -> Result<BehaviorHandlers, HandlerError> {
            Ok(BehaviorHandlers {
                world_decorator: Some(Box::new(Counting(Arc::clone(&shared)))),
                quit_evaluator: Some(Box::new(Scripted {
                    calls: Arc::clone(&shared),
                    quit_after,
                    polls: 0,
                })),
            })
        };
        (Harness::with_factory(Box::new(factory)), calls)
    }

    #[test]
    fn roster_emptying_ends_the_run() {
        let mut h = Harness::started();
        run(&mut h, descriptor(&["AgentA", "AgentB"]));

        h.machine.on_message(&finished("AgentA"));
        h.step();
        assert_eq!(h.machine.phase(), Phase::Running);

        h.machine.on_message(&finished("Stranger"));
        h.machine.on_message(&finished("AgentB"));
        h.step();
        assert_eq!(h.machine.phase(), Phase::AwaitingQuit);
        assert_eq!(h.machine.quit_code(), ALL_PARTICIPANTS_FINISHED);
    }

    #[test]
    fn quit_evaluator_outcome_becomes_quit_code() {
        let (mut h, calls) = scripted(3);
        h.step();
        // The step that enters the run already polls once.
        run(&mut h, descriptor(&["AgentA"]));

        h.step();
        assert_eq!(h.machine.phase(), Phase::Running);
        h.step();
        assert_eq!(h.machine.phase(), Phase::AwaitingQuit);
        assert_eq!(h.machine.quit_code(), "Goal reached");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.prepared, 1);
        assert_eq!(calls.cleaned, 1);
        assert_eq!(calls.updates, 3);
    }

    #[test]
    fn only_post_ticks_drive_the_run() {
        let mut h = Harness::started();
        run(&mut h, descriptor(&["AgentA"]));
        h.machine.on_message(&finished("AgentA"));
        h.machine.on_tick(TickPhase::Pre);
        assert_eq!(h.machine.phase(), Phase::Running);
        h.machine.on_tick(TickPhase::Post);
        assert_eq!(h.machine.phase(), Phase::AwaitingQuit);
    }

    #[test]
    fn time_policy_applied_on_entry() {
        let mut h = Harness::started();
        let mut d = descriptor(&["AgentA"]);
        d.conditions.time = Some(TimePolicy {
            start_time: Some(6000),
            allow_passage_of_time: None,
        });
        run(&mut h, d);
        assert_eq!(h.host.snapshot().time_policy, Some((true, Some(6000))));
    }

    #[test]
    fn no_time_section_leaves_clock_alone() {
        let mut h = Harness::started();
        run(&mut h, descriptor(&["AgentA"]));
        assert!(h.host.snapshot().time_policy.is_none());
    }

    #[test]
    fn bail_aborts_and_cleans_up_evaluator() {
        let (mut h, calls) = scripted(1000);
        h.step();
        run(&mut h, descriptor(&["AgentA"]));

        h.machine.on_message(&bailed("AgentA", "lost connection"));
        h.step();

        let aborts = h.bus.sent_of(MessageType::ServerAbort);
        assert_eq!(aborts.len(), 1);
        assert_eq!(aborts.first().unwrap().get(keys::MESSAGE), Some("lost connection"));
        assert_eq!(h.machine.phase(), Phase::Error);
        assert_eq!(calls.lock().unwrap().cleaned, 1);

        h.step();
        assert_eq!(h.machine.phase(), Phase::Dormant);
        assert_eq!(calls.lock().unwrap().cleaned, 1);
    }

    #[test]
    fn shutdown_mid_run_cleans_up_evaluator_once() {
        let (mut h, calls) = scripted(1000);
        h.step();
        run(&mut h, descriptor(&["AgentA"]));
        let updates = calls.lock().unwrap().updates;

        h.machine.shutdown();
        h.machine.shutdown();
        assert!(h.machine.is_shut_down());
        assert_eq!(calls.lock().unwrap().cleaned, 1);
        assert_eq!(
            h.bus.listener_count(MessageType::ParticipantAgentFinishedMission),
            0
        );
        assert_eq!(h.bus.listener_count(MessageType::ParticipantBailed), 0);

        h.machine.on_message(&finished("AgentA"));
        h.step();
        assert_eq!(h.machine.phase(), Phase::Running);
        assert_eq!(calls.lock().unwrap().updates, updates);
    }
}
