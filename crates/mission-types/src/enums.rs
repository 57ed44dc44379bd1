//! Enumeration types for the mission server.
//!
//! Phases of the session lifecycle, the tick marker delivered by the host,
//! the closed set of message types exchanged with participants, and the
//! small enums used inside the mission descriptor.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One named state of the server-side session lifecycle.
///
/// Exactly one phase is current at any instant. The machine is cyclic:
/// [`Phase::Cleanup`] always routes back to [`Phase::Dormant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Waiting for the host to start delivering ticks.
    Initializing,
    /// Idle and receptive to a new mission.
    Dormant,
    /// Decorating the world for the accepted mission.
    BuildingWorld,
    /// Waiting for every participant to join and start running.
    AwaitingAssembly,
    /// The mission is live.
    Running,
    /// Waiting for every participant to acknowledge the stop request.
    AwaitingQuit,
    /// The mission failed and is being abandoned.
    Error,
    /// Releasing all per-mission state.
    Cleanup,
}

impl Phase {
    /// Every phase, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Initializing,
        Self::Dormant,
        Self::BuildingWorld,
        Self::AwaitingAssembly,
        Self::Running,
        Self::AwaitingQuit,
        Self::Error,
        Self::Cleanup,
    ];

    /// The wire and status-text spelling of this phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Dormant => "DORMANT",
            Self::BuildingWorld => "BUILDING_WORLD",
            Self::AwaitingAssembly => "AWAITING_ASSEMBLY",
            Self::Running => "RUNNING",
            Self::AwaitingQuit => "AWAITING_QUIT",
            Self::Error => "ERROR",
            Self::Cleanup => "CLEANUP",
        }
    }
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tick marker
// ---------------------------------------------------------------------------

/// Which half of a host simulation step a tick notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickPhase {
    /// Delivered before the host advances its world.
    Pre,
    /// Delivered after the host advanced its world.
    Post,
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// The closed set of message types this server sends or listens for.
///
/// `Participant*` types flow from remote participants to the server;
/// `Server*` types flow from the server to participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// A participant cannot continue the mission.
    ParticipantBailed,
    /// A participant has joined and waits for permission to proceed.
    ParticipantAgentReady,
    /// A participant has entered its running state.
    ParticipantAgentRunning,
    /// A participant has stopped after a stop request.
    ParticipantAgentStopped,
    /// A participant has finished its part of the mission.
    ParticipantAgentFinishedMission,
    /// Human-readable status line describing a phase change.
    ServerStatusText,
    /// The mission is being aborted.
    ServerAbort,
    /// Every participant must stop; carries the quit code.
    ServerStopParticipants,
    /// Every participant has joined; they may proceed.
    ServerAllJoined,
    /// The mission is over.
    ServerMissionOver,
}

impl MessageType {
    /// The wire spelling of this message type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParticipantBailed => "participant-bailed",
            Self::ParticipantAgentReady => "participant-agent-ready",
            Self::ParticipantAgentRunning => "participant-agent-running",
            Self::ParticipantAgentStopped => "participant-agent-stopped",
            Self::ParticipantAgentFinishedMission => "participant-agent-finished-mission",
            Self::ServerStatusText => "server-status-text",
            Self::ServerAbort => "server-abort",
            Self::ServerStopParticipants => "server-stop-participants",
            Self::ServerAllJoined => "server-all-joined",
            Self::ServerMissionOver => "server-mission-over",
        }
    }

    /// Whether this type flows from participants to the server.
    pub const fn is_inbound(self) -> bool {
        matches!(
            self,
            Self::ParticipantBailed
                | Self::ParticipantAgentReady
                | Self::ParticipantAgentRunning
                | Self::ParticipantAgentStopped
                | Self::ParticipantAgentFinishedMission
        )
    }
}

impl core::fmt::Display for MessageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Descriptor enums
// ---------------------------------------------------------------------------

/// Game mode a participant plays the mission in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Normal play with health and hunger.
    #[default]
    Survival,
    /// Unlimited resources, no damage.
    Creative,
    /// Survival without world modification.
    Adventure,
    /// Invisible, non-interacting observer. Used to protect participants
    /// while the rest of the cast assembles.
    Spectator,
}

/// Weather requested by a mission's initial conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherKind {
    /// Leave the host's weather untouched.
    #[default]
    Normal,
    /// Clear skies for the whole mission.
    Clear,
    /// Rain for the whole mission.
    Rain,
    /// Thunderstorm for the whole mission.
    Thunder,
}

/// Answer to the host's natural-spawn query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnDecision {
    /// Let the host spawn as it normally would.
    Allow,
    /// Cancel the spawn.
    Deny,
}
