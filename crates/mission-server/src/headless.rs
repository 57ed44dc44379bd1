//! A [`WorldHost`] with no game attached.
//!
//! [`HeadlessWorld`] keeps the participant state the machine asks for in
//! memory and logs every change. It lets the server run the full mission
//! protocol against real participants without a simulation behind it.

use std::collections::HashMap;

use mission_core::host::{WeatherDurations, WorldHost};
use mission_types::{GameMode, InventorySlot, Placement};
use tracing::{debug, info};

/// Last known state of one participant.
#[derive(Debug, Clone, Default, PartialEq)]
struct ParticipantState {
    mode: Option<GameMode>,
    /// Block-centred position from the last placement.
    position: Option<(f64, f64, f64)>,
    inventory: Vec<InventorySlot>,
}

/// In-memory world host.
#[derive(Debug, Default)]
pub struct HeadlessWorld {
    participants: HashMap<String, ParticipantState>,
    time_frozen: bool,
    world_time: Option<u64>,
    weather: Option<WeatherDurations>,
}

impl HeadlessWorld {
    /// An empty world.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, username: &str) -> &mut ParticipantState {
        self.participants.entry(username.to_owned()).or_default()
    }
}

impl WorldHost for HeadlessWorld {
    fn has_participant(&self, _username: &str) -> bool {
        // Participants connect over the bus, so any username is taken as present.
        true
    }

    fn reset_vitals(&mut self, username: &str) {
        debug!(username, "Vitals reset");
        self.entry(username);
    }

    fn place(&mut self, username: &str, placement: &Placement) {
        let position = placement.block_center();
        debug!(username, x = position.0, y = position.1, z = position.2, "Participant placed");
        self.entry(username).position = Some(position);
    }

    fn set_inventory(&mut self, username: &str, slots: &[InventorySlot]) {
        let state = self.entry(username);
        debug!(
            username,
            slots = slots.len(),
            replaced = state.inventory.len(),
            "Inventory loaded"
        );
        state.inventory = slots.to_vec();
    }

    fn set_game_mode(&mut self, username: &str, mode: GameMode) {
        let state = self.entry(username);
        debug!(username, ?mode, previous = ?state.mode, "Game mode set");
        state.mode = Some(mode);
    }

    fn land(&mut self, username: &str) {
        let position = self.participants.get(username).and_then(|s| s.position);
        debug!(username, ?position, "Participant landed");
    }

    fn set_time_policy(&mut self, allow_passage: bool, start_time: Option<u64>) {
        info!(
            allow_passage,
            start_time,
            was_frozen = self.time_frozen,
            previous_time = self.world_time,
            "Time policy applied"
        );
        self.time_frozen = !allow_passage;
        if start_time.is_some() {
            self.world_time = start_time;
        }
    }

    fn set_weather(&mut self, weather: WeatherDurations) {
        info!(
            raining = weather.raining(),
            thundering = weather.thundering(),
            replaced = self.weather.is_some(),
            "Weather applied"
        );
        self.weather = Some(weather);
    }

    fn send_chat(&mut self, line: &str) {
        info!(line, "Chat");
    }
}
