//! OS platform boundary: timed wakes and background execution budget.
//!
//! The host OS grants execution time in short, renewable windows rather than
//! arbitrary background residency. This module models that boundary as the
//! [`WakePlatform`] trait (the OS wake/notification primitives) plus the
//! [`BudgetCoordinator`](budget::BudgetCoordinator) that renews windows and
//! degrades gracefully when the budget runs out.

mod budget;
mod local;

pub use budget::{BudgetCoordinator, ExecutionWindow};
pub use local::LocalWakePlatform;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{AlarmId, OccurrenceId, RegistrationId};

/// Errors from the platform boundary.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The OS refused the registration (e.g. permission revoked).
    #[error("scheduling denied: {0}")]
    Denied(String),

    /// The registration token is unknown to the platform.
    #[error("unknown registration: {0}")]
    UnknownRegistration(RegistrationId),

    /// Any other platform failure.
    #[error("platform failure: {0}")]
    Other(String),
}

/// Background execution categories the engine declares at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundCapability {
    /// Periodic background refresh opportunities.
    PeriodicRefresh,
    /// Timed wake at a specific instant, surviving process termination.
    TimedWake,
}

/// The enumerated capability set this engine needs.
pub const REQUIRED_CAPABILITIES: &[BackgroundCapability] = &[
    BackgroundCapability::PeriodicRefresh,
    BackgroundCapability::TimedWake,
];

/// A wake request handed to the platform: the callback context travels with
/// the registration so the eventual wake carries everything the router needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeRequest {
    /// Alarm the wake belongs to.
    pub alarm_id: AlarmId,
    /// Occurrence the wake will trigger.
    pub occurrence_id: OccurrenceId,
    /// When the OS should invoke the engine.
    pub fire_at: DateTime<Utc>,
}

/// OS-level wake and background-task primitives.
///
/// Implementations: [`LocalWakePlatform`] (in-process tokio timers, used by
/// the host binary) and `testing::MockWakePlatform`.
#[async_trait]
pub trait WakePlatform: Send + Sync {
    /// Register a timed wake. Even if the process is fully terminated, the
    /// OS re-launches it at (or near) `fire_at`.
    async fn reserve(&self, wake: WakeRequest) -> Result<RegistrationId, PlatformError>;

    /// Cancel a pending wake registration.
    async fn release(&self, registration: RegistrationId) -> Result<(), PlatformError>;

    /// Whether a registration is still live with the OS.
    ///
    /// Stored tokens can go stale (device reboot, wake already consumed);
    /// reconciliation verifies against this rather than trusting the store.
    async fn is_registered(&self, registration: RegistrationId) -> bool;

    /// Ask the OS to extend the current execution window. Returns the
    /// granted budget, which may be shorter than requested.
    async fn extend_window(&self, requested: Duration) -> Result<Duration, PlatformError>;

    /// Declare the background execution categories the engine needs.
    /// Invoked once at launch.
    fn declare_capabilities(&self, capabilities: &[BackgroundCapability]);
}
