//! Session state machine and phase behaviors for the mission server.
//!
//! This crate owns the server-side mission lifecycle: a cyclic sequence of
//! phases (Initializing, Dormant, Building World, Awaiting Assembly,
//! Running, Awaiting Quit, Error, Cleanup) driven by host ticks and inbound
//! participant messages.
//!
//! # Modules
//!
//! - [`bus`] -- [`MessageBus`] contract, listener bookkeeping, and a
//!   recording bus.
//! - [`config`] -- Configuration loading from `mission-server.yaml` into
//!   strongly-typed structs.
//! - [`episode`] -- The [`Episode`] contract, its context, the error latch
//!   and spawn-control components.
//! - [`handlers`] -- Behavior handlers derived from a mission: world
//!   decorator and quit evaluator.
//! - [`host`] -- [`WorldHost`] contract for the world and participants.
//! - [`machine`] -- The [`StateMachine`] and its transition protocol.
//! - [`mailbox`] -- Single-slot hand-off for queued mission descriptors.
//! - [`runner`] -- Async driver feeding ticks and messages to a machine.
//!
//! [`MessageBus`]: bus::MessageBus
//! [`Episode`]: episode::Episode
//! [`WorldHost`]: host::WorldHost
//! [`StateMachine`]: machine::StateMachine

pub mod bus;
pub mod config;
pub mod episode;
mod episodes;
pub mod handlers;
pub mod host;
pub mod machine;
pub mod mailbox;
pub mod runner;
mod session;

#[cfg(test)]
mod test_support;
