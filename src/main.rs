//! rvl - an alarm scheduling and delivery engine host.
//!
//! Usage:
//!   rvl run <config.yaml>      Run the engine with alarms from a config file
//!   rvl validate <config.yaml> Validate alarm configuration without running
//!   rvl list <config.yaml>     List all alarms in the configuration
//!   rvl trigger <config.yaml> <alarm-id>  Fire one alarm immediately

use chrono::Utc;
use clap::{Parser, Subcommand};
use reveille::config::{build_alarms, load_host_config, HostConfig, StorageConfig};
use reveille::{
    AlarmEngine, AlarmStore, Event, EventBus, EventHandler, EngineError, EngineHandle,
    LocalWakePlatform, LogAlertSink, LogHandler, MemoryStore, SqliteStore, StoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// rvl - alarm scheduling and delivery engine
#[derive(Parser)]
#[command(name = "rvl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with alarms from a config file
    Run {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Validate alarm configuration without running
    Validate {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List all alarms in the configuration
    List {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Fire one alarm immediately (rings briefly, then dismisses)
    Trigger {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Alarm ID to trigger
        #[arg(value_name = "ALARM_ID")]
        alarm_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_engine(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::List { config } => list_alarms(config)?,
        Commands::Trigger { config, alarm_id } => trigger_alarm(config, alarm_id).await?,
    }

    Ok(())
}

/// Run the engine with alarms from a config file.
async fn run_engine(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading config from: {}", config_path.display());
    let config = load_host_config(&config_path)?;

    match &config.storage {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; alarms will not survive a restart");
            serve(MemoryStore::new(), config).await
        }
        StorageConfig::Sqlite { path } => {
            info!("Using SQLite storage at {}", path);
            let store = SqliteStore::new(path).await?;
            serve(store, config).await
        }
    }
}

/// Run the engine over the given store until Ctrl+C.
async fn serve<S: AlarmStore + 'static>(
    store: S,
    config: HostConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let alarms = build_alarms(&config, Utc::now())?;
    info!("Loaded {} alarm(s)", alarms.len());

    let (platform, wake_rx) = LocalWakePlatform::new();
    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LogHandler)).await;

    let engine = AlarmEngine::new(store, platform, LogAlertSink)
        .with_config(config.engine.clone())
        .with_event_bus(event_bus);
    engine.register_background_capability();

    let (handle, engine_task) = engine.start().await;

    // Declared alarms are upserted: create, or update when already persisted.
    for alarm in alarms {
        let id = alarm.id.clone();
        match handle.create_alarm(alarm.clone()).await {
            Ok(()) => {}
            Err(EngineError::Store(StoreError::DuplicateId(_))) => {
                handle.update_alarm(alarm).await?;
            }
            Err(e) => {
                error!(alarm_id = %id, error = %e, "Failed to register alarm");
                return Err(e.into());
            }
        }
    }

    let report = handle.on_launch(true).await?;
    info!(
        "Armed {} alarm(s), {} already in place",
        report.reserved, report.unchanged
    );

    // Forward platform wakes into the engine, playing the OS callback role.
    forward_wakes(&handle, wake_rx);

    info!("Engine running. Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("\nShutting down...");
            handle.shutdown().await?;
        }
        _ = engine_task => {
            info!("Engine stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate alarm configuration without running.
fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating config: {}", config_path.display());

    let config = load_host_config(&config_path)?;
    match build_alarms(&config, Utc::now()) {
        Ok(alarms) => {
            info!("All {} alarm(s) are valid:", alarms.len());
            for alarm in &alarms {
                info!("  - {} ({}): OK", alarm.id, alarm.label);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all alarms in the configuration.
fn list_alarms(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_host_config(&config_path)?;
    let alarms = build_alarms(&config, Utc::now())?;

    if alarms.is_empty() {
        println!("No alarms found in {}", config_path.display());
        return Ok(());
    }

    println!("Alarms in {}:", config_path.display());
    println!();

    for alarm in &alarms {
        println!("ID: {}", alarm.id);
        if !alarm.label.is_empty() {
            println!("  Label: {}", alarm.label);
        }
        println!("  Enabled: {}", alarm.enabled);
        println!("  Next fire: {}", alarm.trigger_time);
        println!("  Repeat: {:?}", alarm.repeat);
        println!("  Sound: {} (volume {})", alarm.sound.asset, alarm.sound.volume);
        println!();
    }

    Ok(())
}

/// Event handler that signals when a specific alarm starts or finishes
/// delivering.
struct DeliveryWatcher {
    target: String,
    started: Arc<tokio::sync::Notify>,
    finished: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl EventHandler for DeliveryWatcher {
    async fn handle(&self, event: &Event) {
        match event {
            Event::DeliveryStarted { alarm_id, .. } if alarm_id.as_str() == self.target => {
                self.started.notify_one();
            }
            Event::DeliveryFinished { alarm_id, .. } if alarm_id.as_str() == self.target => {
                self.finished.notify_one();
            }
            _ => {}
        }
    }
}

/// Fire a specific alarm immediately and walk it through a full delivery.
async fn trigger_alarm(
    config_path: PathBuf,
    alarm_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_host_config(&config_path)?;
    let alarms = build_alarms(&config, Utc::now())?;

    let Some(alarm) = alarms.iter().find(|a| a.id.as_str() == alarm_id) else {
        error!("Alarm '{}' not found", alarm_id);
        error!(
            "Available alarms: {}",
            alarms
                .iter()
                .map(|a| a.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Err(format!("alarm '{}' not found", alarm_id).into());
    };

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LogHandler)).await;

    let started = Arc::new(tokio::sync::Notify::new());
    let finished = Arc::new(tokio::sync::Notify::new());
    event_bus
        .register(Arc::new(DeliveryWatcher {
            target: alarm_id.clone(),
            started: Arc::clone(&started),
            finished: Arc::clone(&finished),
        }))
        .await;

    let (platform, wake_rx) = LocalWakePlatform::new();
    let engine = AlarmEngine::new(MemoryStore::new(), platform, LogAlertSink)
        .with_config(config.engine.clone())
        .with_event_bus(event_bus);
    let (handle, _engine_task) = engine.start().await;

    // Arm the chosen alarm two seconds out, regardless of its real schedule.
    let mut alarm = alarm.clone();
    alarm.trigger_time = Utc::now() + chrono::Duration::seconds(2);
    alarm.repeat = reveille::RepeatRule::Once;
    handle.create_alarm(alarm).await?;

    forward_wakes(&handle, wake_rx);

    info!("Triggering alarm '{}'...", alarm_id);
    tokio::select! {
        _ = started.notified() => {}
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            warn!("Alarm did not start delivering within 30s");
            handle.shutdown().await?;
            return Err("trigger timed out".into());
        }
    }

    // Let it ring briefly, then dismiss.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let stored = handle.get_alarm(alarm_id.as_str()).await?;
    if let Some(occurrence) = stored.occurrence {
        handle.dismiss(alarm_id.as_str(), occurrence.occurrence_id).await?;
        finished.notified().await;
    }

    handle.shutdown().await?;
    info!("Done!");
    Ok(())
}

/// Spawn the task that plays the OS: forwards platform wakes into the
/// engine handle.
fn forward_wakes(handle: &EngineHandle, mut wake_rx: mpsc::Receiver<reveille::WakeRequest>) {
    let handle = handle.clone();
    tokio::spawn(async move {
        while let Some(wake) = wake_rx.recv().await {
            handle.on_wake(wake.alarm_id, wake.occurrence_id).await;
        }
    });
}
