//! Async driver for a [`StateMachine`].
//!
//! [`run_machine`] stands in for the host's simulation thread: it delivers
//! one PRE and one POST tick per step on a fixed interval, and forwards
//! inbound participant messages from a bounded channel as they arrive.
//! Both go through the same task, so the machine never sees concurrent
//! calls. At most [`RunnerConfig::max_messages_per_step`] messages are
//! forwarded between two steps, so a flood of messages cannot hold back
//! the ticks.
//!
//! The loop runs until a [`ShutdownSignal`] is raised, then shuts the
//! machine down.

use std::sync::atomic::{AtomicBool, Ordering};

use mission_types::{Message, Phase, TickPhase};
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::machine::StateMachine;

/// Shared stop flag for the run loop.
///
/// Wrap in an `Arc` and hand a clone to whatever decides when to stop
/// (a Ctrl-C handler, a control endpoint, a test).
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// A signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run loop to stop after the call it is currently making.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn wait(&self) {
        while !self.is_requested() {
            self.notify.notified().await;
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Host steps delivered (each one PRE and one POST tick).
    pub steps: u64,
    /// Inbound messages forwarded to the machine.
    pub messages: u64,
    /// Steps whose message budget ran out before the inbound queue did.
    pub throttled: u64,
    /// Phase the machine was in when the loop stopped.
    pub final_phase: Phase,
}

/// Drive `machine` until `shutdown` is raised.
///
/// Shutdown is checked first, then inbound messages, then the tick
/// interval. If the inbound channel closes the loop keeps ticking. Once the
/// step's message budget is spent, inbound messages wait for the next tick.
/// The machine is shut down before returning.
pub async fn run_machine(
    machine: &mut StateMachine,
    inbound: &mut mpsc::Receiver<Message>,
    shutdown: &ShutdownSignal,
    config: &RunnerConfig,
) -> RunSummary {
    let mut interval = tokio::time::interval(config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut steps: u64 = 0;
    let mut messages: u64 = 0;
    let mut throttled: u64 = 0;
    let mut since_step: u32 = 0;
    let budget = config.message_budget();
    let mut inbound_open = true;

    info!(
        tick_interval_ms = config.tick_interval_ms,
        message_budget = budget,
        phase = %machine.phase(),
        "Mission server loop starting"
    );

    loop {
        if shutdown.is_requested() {
            break;
        }
        tokio::select! {
            biased;
            () = shutdown.wait() => break,
            received = inbound.recv(), if inbound_open && since_step < budget => {
                if let Some(message) = received {
                    machine.on_message(&message);
                    messages = messages.saturating_add(1);
                    since_step = since_step.saturating_add(1);
                    if since_step == budget {
                        throttled = throttled.saturating_add(1);
                        debug!(budget, "Message budget spent, waiting for the next step");
                    }
                } else {
                    info!("Inbound message channel closed, ticking on");
                    inbound_open = false;
                }
            }
            _ = interval.tick() => {
                machine.on_tick(TickPhase::Pre);
                machine.on_tick(TickPhase::Post);
                steps = steps.saturating_add(1);
                since_step = 0;
                debug!(step = steps, phase = %machine.phase(), "Step delivered");
            }
        }
    }

    machine.shutdown();
    RunSummary {
        steps,
        messages,
        throttled,
        final_phase: machine.phase(),
    }
}

/// Log the end of a run.
pub fn log_run_end(summary: &RunSummary) {
    info!(
        steps = summary.steps,
        messages = summary.messages,
        throttled = summary.throttled,
        final_phase = %summary.final_phase,
        "Mission server loop stopped"
    );
}
