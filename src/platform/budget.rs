//! Background execution budget tracking and renewal.
//!
//! Wraps a [`WakePlatform`] with bookkeeping for the short, renewable
//! execution window the OS grants. Registrations made through the
//! coordinator double as the fallback wake primitive: they survive process
//! termination, so exhausting the budget degrades delivery latency but never
//! loses an alarm.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::{PlatformError, WakePlatform, WakeRequest};
use crate::core::types::RegistrationId;
use crate::events::{Event, EventBus};

/// The execution window currently granted by the OS.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionWindow {
    granted_at: Instant,
    budget: Duration,
}

impl ExecutionWindow {
    /// Create a window granted now with the given budget.
    pub fn new(budget: Duration) -> Self {
        Self {
            granted_at: Instant::now(),
            budget,
        }
    }

    /// Budget left in this window.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.granted_at.elapsed())
    }
}

type WarningCallback = Box<dyn Fn(Duration) + Send + Sync>;

/// Negotiates execution windows with the platform and renews them before
/// they expire whenever a pending fire time lies beyond the remaining
/// budget.
pub struct BudgetCoordinator<P> {
    platform: Arc<P>,
    window: Mutex<ExecutionWindow>,
    renewal_margin: Duration,
    events: Arc<EventBus>,
    warning_callbacks: RwLock<Vec<WarningCallback>>,
    exhausted: AtomicBool,
}

impl<P: WakePlatform> BudgetCoordinator<P> {
    /// Create a coordinator over the given platform.
    pub fn new(
        platform: Arc<P>,
        events: Arc<EventBus>,
        initial_budget: Duration,
        renewal_margin: Duration,
    ) -> Self {
        Self {
            platform,
            window: Mutex::new(ExecutionWindow::new(initial_budget)),
            renewal_margin,
            events,
            warning_callbacks: RwLock::new(Vec::new()),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Access the underlying platform.
    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// Budget left in the current window.
    pub fn remaining(&self) -> Duration {
        self.window
            .lock()
            .map(|w| w.remaining())
            .unwrap_or(Duration::ZERO)
    }

    /// Register a callback invoked when the budget cannot be renewed.
    ///
    /// The callback receives the remaining budget at the time of exhaustion.
    pub fn on_budget_warning(&self, callback: impl Fn(Duration) + Send + Sync + 'static) {
        if let Ok(mut callbacks) = self.warning_callbacks.write() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Register the fallback timed wake for an occurrence.
    ///
    /// A denial is reported on the event bus by the caller; this method only
    /// translates the platform response.
    pub async fn reserve(&self, wake: WakeRequest) -> Result<RegistrationId, PlatformError> {
        self.platform.reserve(wake).await
    }

    /// Release a wake registration. Failures are logged, not surfaced: a
    /// stale token means the wake already fired or was never armed.
    pub async fn release(&self, registration: RegistrationId) {
        if let Err(e) = self.platform.release(registration).await {
            tracing::debug!(registration = %registration, error = %e, "Failed to release wake registration");
        }
    }

    /// Renew the execution window if the next fire time lies beyond the
    /// remaining budget.
    ///
    /// Denial is not fatal: delivery falls back to the OS wake primitive and
    /// the exhaustion is reported once via `on_budget_warning` callbacks and
    /// a [`Event::BudgetWarning`] on the bus.
    pub async fn maintain(&self, next_fire: Option<DateTime<Utc>>) {
        let remaining = self.remaining();

        let Some(next_fire) = next_fire else {
            return;
        };

        let until_fire = (next_fire - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if until_fire + self.renewal_margin <= remaining {
            return;
        }

        // Ask for one margin of slack beyond the need so the next checks
        // do not renew again on boundary jitter.
        let requested = until_fire + self.renewal_margin * 2;
        match self.platform.extend_window(requested).await {
            Ok(granted) => {
                if let Ok(mut window) = self.window.lock() {
                    *window = ExecutionWindow::new(granted);
                }
                if self.exhausted.swap(false, Ordering::SeqCst) {
                    tracing::info!(granted_secs = granted.as_secs(), "Execution budget renewed");
                }
            }
            Err(e) => {
                // Report exhaustion once per denial streak.
                if !self.exhausted.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        error = %e,
                        remaining_ms = remaining.as_millis() as u64,
                        "Execution budget renewal denied; relying on OS wake primitive"
                    );
                    if let Ok(callbacks) = self.warning_callbacks.read() {
                        for callback in callbacks.iter() {
                            callback(remaining);
                        }
                    }
                    self.events
                        .emit(Event::budget_warning(remaining, e.to_string()))
                        .await;
                }
            }
        }
    }
}
