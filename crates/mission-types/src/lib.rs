//! Shared type definitions for the mission server.
//!
//! This crate is the vocabulary spoken between the session state machine,
//! the host that owns the world, and the remote participants. It has no
//! behavior of its own beyond small lookups on the descriptor.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for mission identifiers
//! - [`enums`] -- Phases, tick markers, message types, game modes, weather
//! - [`descriptor`] -- The parsed, immutable mission descriptor
//! - [`messages`] -- Typed messages with a string key/value payload

pub mod descriptor;
pub mod enums;
pub mod ids;
pub mod messages;

// Re-export all public types at crate root for convenience.
pub use descriptor::{
    InventorySlot, MissionDescriptor, ParticipantSpec, Placement, QuitConditions, TimePolicy,
    WorldConditions,
};
pub use enums::{GameMode, MessageType, Phase, SpawnDecision, TickPhase, WeatherKind};
pub use ids::MissionId;
pub use messages::{Message, Payload, keys};
