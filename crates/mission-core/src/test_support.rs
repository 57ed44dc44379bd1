//! Fixtures shared by the unit tests.

use std::sync::Arc;

use mission_types::{
    GameMode, InventorySlot, Message, MessageType, MissionDescriptor, ParticipantSpec, Placement,
    TickPhase, keys,
};

use crate::bus::RecordingBus;
use crate::config::MachineConfig;
use crate::handlers::{DefaultHandlerFactory, HandlerFactory};
use crate::host::RecordingHost;
use crate::machine::StateMachine;

/// A descriptor declaring the named participants in creative mode, each
/// with a placement and one inventory slot.
pub(crate) fn descriptor(names: &[&str]) -> MissionDescriptor {
    MissionDescriptor {
        summary: String::from("Test mission"),
        source_address: Some(String::from("127.0.0.1:10000")),
        participants: names
            .iter()
            .map(|name| ParticipantSpec {
                name: (*name).to_owned(),
                mode: GameMode::Creative,
                placement: Some(Placement {
                    x: 1.0,
                    y: 64.0,
                    z: 2.0,
                    yaw: 90.0,
                    pitch: 0.0,
                }),
                inventory: vec![InventorySlot {
                    slot: 0,
                    item: String::from("torch"),
                    quantity: 4,
                }],
            })
            .collect(),
        conditions: mission_types::WorldConditions::default(),
        quit: mission_types::QuitConditions::default(),
    }
}

/// Conventional session user for a participant name.
pub(crate) fn user_of(name: &str) -> String {
    format!("user-{name}")
}

pub(crate) fn ready(name: &str) -> Message {
    Message::new(MessageType::ParticipantAgentReady)
        .with(keys::AGENT_NAME, name)
        .with(keys::USERNAME, user_of(name))
}

pub(crate) fn running(name: &str) -> Message {
    Message::new(MessageType::ParticipantAgentRunning).with(keys::USERNAME, user_of(name))
}

pub(crate) fn finished(name: &str) -> Message {
    Message::new(MessageType::ParticipantAgentFinishedMission).with(keys::AGENT_NAME, name)
}

pub(crate) fn stopped(name: &str) -> Message {
    Message::new(MessageType::ParticipantAgentStopped).with(keys::AGENT_NAME, name)
}

pub(crate) fn bailed(name: &str, detail: &str) -> Message {
    Message::new(MessageType::ParticipantBailed)
        .with(keys::AGENT_NAME, name)
        .with(keys::MESSAGE, detail)
}

/// A machine wired to recording doubles.
pub(crate) struct Harness {
    pub(crate) machine: StateMachine,
    pub(crate) host: RecordingHost,
    pub(crate) bus: Arc<RecordingBus>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_factory(Box::new(DefaultHandlerFactory::new()))
    }

    pub(crate) fn with_factory(factory: Box<dyn HandlerFactory>) -> Self {
        let host = RecordingHost::new();
        let bus = Arc::new(RecordingBus::new());
        let machine = StateMachine::new(
            MachineConfig::default(),
            Box::new(host.clone()),
            Arc::clone(&bus) as Arc<dyn crate::bus::MessageBus>,
            factory,
        );
        Self { machine, host, bus }
    }

    /// One host step: a PRE tick then a POST tick.
    pub(crate) fn step(&mut self) {
        self.machine.on_tick(TickPhase::Pre);
        self.machine.on_tick(TickPhase::Post);
    }

    /// Step past initialization into the dormant phase.
    pub(crate) fn started() -> Self {
        let mut harness = Self::new();
        harness.step();
        harness
    }
}
