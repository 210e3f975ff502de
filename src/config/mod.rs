//! Configuration loading for the engine and host alarm files.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{AlarmSpec, EngineConfig, HostConfig, SnoozeSpec, SoundSpec, StorageConfig};
pub use yaml::{build_alarm, build_alarms, load_host_config, parse_host_config};
