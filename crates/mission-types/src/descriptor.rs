//! The mission descriptor: an immutable, fully-parsed description of a
//! mission.
//!
//! Parsing and schema validation happen upstream; the state machine receives
//! a ready value. The types derive `Deserialize` so that a descriptor can be
//! loaded from a YAML or JSON file by the server binary.

use serde::{Deserialize, Serialize};

use crate::enums::{GameMode, SpawnDecision, WeatherKind};

/// A parsed mission: who takes part, what the world looks like at the start,
/// and when the mission should end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDescriptor {
    /// One-line human-readable summary of the mission.
    pub summary: String,

    /// Network address of the client that requested the mission, if known.
    #[serde(default)]
    pub source_address: Option<String>,

    /// Participants expected to join, in declaration order.
    #[serde(default)]
    pub participants: Vec<ParticipantSpec>,

    /// World initial conditions.
    #[serde(default)]
    pub conditions: WorldConditions,

    /// Conditions under which the server ends the mission on its own.
    #[serde(default)]
    pub quit: QuitConditions,
}

impl MissionDescriptor {
    /// Look up a participant by name.
    pub fn participant(&self, name: &str) -> Option<&ParticipantSpec> {
        self.participants.iter().find(|p| p.name == name)
    }

    /// Iterate over the declared participant names.
    pub fn participant_names(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.name.as_str())
    }

    /// Answer the host's natural-spawn query for this mission.
    ///
    /// Spawning is allowed unless the initial conditions explicitly
    /// disable it.
    pub fn spawn_decision(&self) -> SpawnDecision {
        match self.conditions.allow_spawning {
            Some(false) => SpawnDecision::Deny,
            Some(true) | None => SpawnDecision::Allow,
        }
    }
}

/// A participant declared by the mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSpec {
    /// Participant name; the roster key used in participant messages.
    pub name: String,

    /// Game mode applied once the whole cast has assembled.
    #[serde(default)]
    pub mode: GameMode,

    /// Starting position and orientation.
    #[serde(default)]
    pub placement: Option<Placement>,

    /// Starting inventory. Empty means the inventory is left untouched.
    #[serde(default)]
    pub inventory: Vec<InventorySlot>,
}

/// A world position plus view orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// East-west block coordinate.
    pub x: f64,
    /// Vertical block coordinate.
    pub y: f64,
    /// North-south block coordinate.
    pub z: f64,
    /// Horizontal view angle in degrees.
    #[serde(default)]
    pub yaw: f32,
    /// Vertical view angle in degrees.
    #[serde(default)]
    pub pitch: f32,
}

impl Placement {
    /// The position at the center of the block this placement names.
    ///
    /// Participants are dropped in the middle of the block on the
    /// horizontal axes so they do not clip into neighbouring blocks.
    pub fn block_center(&self) -> (f64, f64, f64) {
        (self.x + 0.5, self.y, self.z + 0.5)
    }
}

/// One starting inventory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    /// Slot index in the participant's inventory.
    pub slot: u32,
    /// Item or block type name, as understood by the host.
    pub item: String,
    /// Stack size.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// World initial conditions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldConditions {
    /// Weather for the duration of the mission.
    #[serde(default)]
    pub weather: WeatherKind,

    /// Time-of-day policy. Absent means the host's clock is left alone.
    #[serde(default)]
    pub time: Option<TimePolicy>,

    /// Whether the host may spawn creatures naturally. Absent means yes.
    #[serde(default)]
    pub allow_spawning: Option<bool>,
}

/// Time-of-day policy for the mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimePolicy {
    /// World time to set when the mission starts running.
    #[serde(default)]
    pub start_time: Option<u64>,

    /// Whether world time keeps advancing during the mission.
    #[serde(default)]
    pub allow_passage_of_time: Option<bool>,
}

impl TimePolicy {
    /// Whether time passes. Defaults to `true` when unspecified.
    pub fn allows_passage(&self) -> bool {
        self.allow_passage_of_time.unwrap_or(true)
    }
}

/// Conditions under which the server ends a running mission by itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuitConditions {
    /// End the mission after this many post-phase ticks of running.
    #[serde(default)]
    pub time_limit_ticks: Option<u64>,

    /// Quit code reported when the time limit fires.
    #[serde(default)]
    pub description: Option<String>,
}

const fn default_quantity() -> u32 {
    1
}
