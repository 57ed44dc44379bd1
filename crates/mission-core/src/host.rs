//! World host contract.
//!
//! The host owns the simulated world, its clock, and the connected
//! participants' in-world state. The state machine never touches those
//! directly; it goes through [`WorldHost`]. Every call is synchronous and
//! must not block -- it runs on the tick or message callback.
//!
//! [`RecordingHost`] is an in-memory implementation that records every
//! mutation, for dry runs and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use mission_types::{GameMode, InventorySlot, Placement, WeatherKind};

/// Longest continuous weather duration (in host ticks) the host accepts.
pub const DEFAULT_MAX_WEATHER_DURATION: u32 = 1_000_000 * 20;

/// Weather durations to apply when a mission requests a named condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeatherDurations {
    /// Ticks of clear weather.
    pub clear: u32,
    /// Ticks of rain.
    pub rain: u32,
    /// Ticks of thunder.
    pub thunder: u32,
}

impl WeatherDurations {
    /// Durations for a weather request, or `None` when the host's weather
    /// should be left untouched.
    ///
    /// The requested condition gets `max_duration`; the others get zero.
    pub const fn for_request(kind: WeatherKind, max_duration: u32) -> Option<Self> {
        match kind {
            WeatherKind::Normal => None,
            WeatherKind::Clear => Some(Self {
                clear: max_duration,
                rain: 0,
                thunder: 0,
            }),
            WeatherKind::Rain => Some(Self {
                clear: 0,
                rain: max_duration,
                thunder: 0,
            }),
            WeatherKind::Thunder => Some(Self {
                clear: 0,
                rain: 0,
                thunder: max_duration,
            }),
        }
    }

    /// Whether it should be raining. Thunder implies rain.
    pub const fn raining(&self) -> bool {
        self.rain > 0 || self.thunder > 0
    }

    /// Whether it should be thundering.
    pub const fn thundering(&self) -> bool {
        self.thunder > 0
    }
}

/// The host's world and participant API, as consumed by the phases.
///
/// Participants are addressed by the session user they are connected as
/// (the `username` carried on participant messages).
pub trait WorldHost: Send {
    /// Whether a participant with this user name is connected.
    fn has_participant(&self, username: &str) -> bool;

    /// Bring the participant back to life if needed, then restore health
    /// and food and put out any fire.
    fn reset_vitals(&mut self, username: &str);

    /// Move the participant to the center of the placement's block, apply
    /// its orientation, and zero its velocity.
    fn place(&mut self, username: &str, placement: &Placement);

    /// Clear the participant's inventory, then fill the listed slots.
    fn set_inventory(&mut self, username: &str, slots: &[InventorySlot]);

    /// Switch the participant's game mode.
    fn set_game_mode(&mut self, username: &str, mode: GameMode);

    /// Make sure the participant is not left flying.
    fn land(&mut self, username: &str);

    /// Set whether world time advances and, optionally, the current time.
    fn set_time_policy(&mut self, allow_passage: bool, start_time: Option<u64>);

    /// Apply weather durations.
    fn set_weather(&mut self, weather: WeatherDurations);

    /// Longest continuous weather duration the host accepts.
    fn max_weather_duration(&self) -> u32 {
        DEFAULT_MAX_WEATHER_DURATION
    }

    /// Send a chat line to everyone on the server.
    fn send_chat(&mut self, line: &str);
}

/// Everything a [`RecordingHost`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostLog {
    /// Users whose vitals were reset, in call order.
    pub vitals_reset: Vec<String>,
    /// Last placement applied per user.
    pub placements: BTreeMap<String, Placement>,
    /// Last inventory applied per user.
    pub inventories: BTreeMap<String, Vec<InventorySlot>>,
    /// Every game mode change, in call order.
    pub game_mode_changes: Vec<(String, GameMode)>,
    /// Users that were landed, in call order.
    pub landed: Vec<String>,
    /// Last time policy applied.
    pub time_policy: Option<(bool, Option<u64>)>,
    /// Last weather applied.
    pub weather: Option<WeatherDurations>,
    /// Chat lines sent.
    pub chat: Vec<String>,
}

impl HostLog {
    /// The most recent game mode set for a user.
    pub fn game_mode(&self, username: &str) -> Option<GameMode> {
        self.game_mode_changes
            .iter()
            .rev()
            .find(|(user, _)| user == username)
            .map(|(_, mode)| *mode)
    }
}

/// An in-memory [`WorldHost`] that records every mutation.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to a state machine. Every user counts as connected unless marked
/// absent.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    log: Arc<Mutex<HostLog>>,
    absent: Arc<Mutex<BTreeSet<String>>>,
}

impl RecordingHost {
    /// Create an empty recording host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat a user as not connected.
    pub fn mark_absent(&self, username: &str) {
        self.absent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_owned());
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> HostLog {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, f: impl FnOnce(&mut HostLog)) {
        let mut guard = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl WorldHost for RecordingHost {
    fn has_participant(&self, username: &str) -> bool {
        !self
            .absent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(username)
    }

    fn reset_vitals(&mut self, username: &str) {
        self.record(|log| log.vitals_reset.push(username.to_owned()));
    }

    fn place(&mut self, username: &str, placement: &Placement) {
        self.record(|log| {
            log.placements.insert(username.to_owned(), *placement);
        });
    }

    fn set_inventory(&mut self, username: &str, slots: &[InventorySlot]) {
        self.record(|log| {
            log.inventories.insert(username.to_owned(), slots.to_vec());
        });
    }

    fn set_game_mode(&mut self, username: &str, mode: GameMode) {
        self.record(|log| log.game_mode_changes.push((username.to_owned(), mode)));
    }

    fn land(&mut self, username: &str) {
        self.record(|log| log.landed.push(username.to_owned()));
    }

    fn set_time_policy(&mut self, allow_passage: bool, start_time: Option<u64>) {
        self.record(|log| log.time_policy = Some((allow_passage, start_time)));
    }

    fn set_weather(&mut self, weather: WeatherDurations) {
        self.record(|log| log.weather = Some(weather));
    }

    fn send_chat(&mut self, line: &str) {
        self.record(|log| log.chat.push(line.to_owned()));
    }
}
