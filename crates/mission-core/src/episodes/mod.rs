//! The concrete phase behaviors.
//!
//! [`create`] is the only place a phase is mapped to its episode; the match
//! is exhaustive so a new phase cannot be added without a behavior.

mod assembly;
mod build_world;
mod dormant;
mod initialize;
mod running;
mod teardown;
mod wind_down;

use std::sync::Arc;

use mission_types::{MissionDescriptor, Phase};

use crate::episode::Episode;

/// Build a fresh episode for `phase`, handing it a snapshot of the current
/// mission descriptor.
pub(crate) fn create(phase: Phase, descriptor: Option<Arc<MissionDescriptor>>) -> Box<dyn Episode> {
    match phase {
        Phase::Initializing => Box::new(initialize::InitializeEpisode),
        Phase::Dormant => Box::new(dormant::DormantEpisode::new()),
        Phase::BuildingWorld => Box::new(build_world::BuildWorldEpisode::new(descriptor)),
        Phase::AwaitingAssembly => Box::new(assembly::AssemblyEpisode::new(descriptor)),
        Phase::Running => Box::new(running::RunningEpisode::new(descriptor)),
        Phase::AwaitingQuit => Box::new(wind_down::AwaitQuitEpisode::new(descriptor)),
        Phase::Error => Box::new(teardown::ErrorEpisode),
        Phase::Cleanup => Box::new(teardown::CleanupEpisode),
    }
}
