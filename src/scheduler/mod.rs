//! Alarm scheduling engine.
//!
//! This module provides next-occurrence computation, registration
//! reconciliation across restarts, and the event loop that routes OS
//! callbacks through the occurrence state machine.

mod engine;
mod handle;
mod handlers;
mod rearm;
mod types;

pub use engine::AlarmEngine;
pub use handle::EngineHandle;
pub use handlers::LogHandler;
pub use rearm::{compute_next, RearmReport};
pub use types::{EngineError, EngineState, UserAction};
