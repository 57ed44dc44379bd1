//! Mission server binary.
//!
//! Wires the mission session state machine to a NATS message bus and a
//! headless world host, then drives it on a fixed tick interval until
//! Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`MISSION_SERVER_CONFIG` or `mission-server.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Read the startup mission, if one is configured
//! 4. Connect to NATS and start the bus publisher
//! 5. Build the state machine
//! 6. Subscribe to participant messages and mission requests
//! 7. Run the loop until shutdown
//! 8. Log the result

mod error;
mod headless;
mod nats_bus;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mission_core::bus::MessageBus;
use mission_core::config::{LoggingConfig, ServerConfig};
use mission_core::handlers::DefaultHandlerFactory;
use mission_core::machine::StateMachine;
use mission_core::runner::{self, ShutdownSignal};
use mission_types::MissionDescriptor;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;
use crate::headless::HeadlessWorld;
use crate::nats_bus::{NatsBus, Subjects};

/// Environment variable naming the config file.
const CONFIG_PATH_ENV: &str = "MISSION_SERVER_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
const DEFAULT_CONFIG_PATH: &str = "mission-server.yaml";

/// Application entry point for the mission server.
///
/// # Errors
///
/// Returns an error if any startup step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = ServerConfig::from_file_or_default(&config_path).map_err(ServerError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging)?;
    info!(
        config_path = %config_path.display(),
        tick_interval_ms = config.runner.tick_interval_ms,
        status_prefix = config.machine.status_prefix,
        "mission-server starting"
    );

    // 3. Startup mission.
    let injected = match &config.mission.descriptor_path {
        Some(path) => Some(load_descriptor(path)?),
        None => None,
    };

    // 4. Connect to NATS.
    let nats_url = &config.infrastructure.nats_url;
    info!(nats_url, "Connecting to NATS");
    let client = async_nats::connect(nats_url)
        .await
        .map_err(|e| ServerError::Nats {
            message: format!("failed to connect to {nats_url}: {e}"),
        })?;
    let subjects = Subjects::new(&config.infrastructure.subject_prefix);
    let (bus, _publisher) = NatsBus::start(client.clone(), subjects.clone());
    let listeners = bus.listeners();
    info!(prefix = config.infrastructure.subject_prefix, "NATS bus connected");

    // 5. Build the state machine.
    let bus: Arc<dyn MessageBus> = Arc::new(bus);
    let mut machine = StateMachine::new(
        config.machine.clone(),
        Box::new(HeadlessWorld::new()),
        bus,
        Box::new(DefaultHandlerFactory::new()),
    );
    if let Some(descriptor) = injected {
        info!(summary = %descriptor.summary, "Startup mission injected");
        machine = machine.with_injected_mission(descriptor);
    }

    // 6. Subscriptions.
    let (tx, mut rx) = mpsc::channel(config.runner.inbound_queue_capacity.max(1));
    let _inbound = nats_bus::spawn_inbound(&client, &subjects, listeners, tx).await?;
    let _intake =
        nats_bus::spawn_mission_intake(&client, &subjects, Arc::clone(machine.mailbox())).await?;

    let shutdown = Arc::new(ShutdownSignal::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
            }
            shutdown.request();
        });
    }

    // 7. Run.
    let summary = runner::run_machine(&mut machine, &mut rx, &shutdown, &config.runner).await;

    // 8. Log results.
    runner::log_run_end(&summary);
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush NATS client");
    }
    info!(final_phase = %summary.final_phase, "mission-server shutdown complete");

    Ok(())
}

/// Set up the tracing subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<(), ServerError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| ServerError::Logging {
            message: format!("invalid log level {:?}: {e}", logging.level),
        })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ServerError::Logging {
        message: e.to_string(),
    })
}

/// Read a mission descriptor from a YAML (or JSON) file.
fn load_descriptor(path: &Path) -> Result<MissionDescriptor, ServerError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ServerError::DescriptorRead {
        path: path.to_path_buf(),
        source,
    })?;
    let descriptor: MissionDescriptor =
        serde_yml::from_str(&contents).map_err(|source| ServerError::DescriptorParse {
            path: path.to_path_buf(),
            source,
        })?;
    info!(
        path = %path.display(),
        summary = %descriptor.summary,
        participants = descriptor.participants.len(),
        "Mission descriptor loaded"
    );
    Ok(descriptor)
}
