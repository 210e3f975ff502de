//! In-process wake platform backed by tokio timers.
//!
//! Used by the host binary and examples: wake registrations become sleeping
//! tasks that emit the wake request on a channel when the fire time is
//! reached. There is no real budget constraint in-process, so window
//! extensions are always granted.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BackgroundCapability, PlatformError, WakePlatform, WakeRequest};
use crate::core::types::RegistrationId;

/// Buffer size for the wake delivery channel.
const WAKE_CHANNEL_BUFFER: usize = 32;

/// In-process wake platform.
pub struct LocalWakePlatform {
    wake_tx: mpsc::Sender<WakeRequest>,
    timers: Arc<Mutex<HashMap<RegistrationId, JoinHandle<()>>>>,
}

impl LocalWakePlatform {
    /// Create the platform and the receiver on which wakes are delivered.
    ///
    /// The host forwards received [`WakeRequest`]s into the engine handle,
    /// playing the role of the OS callback.
    pub fn new() -> (Self, mpsc::Receiver<WakeRequest>) {
        let (wake_tx, wake_rx) = mpsc::channel(WAKE_CHANNEL_BUFFER);
        (
            Self {
                wake_tx,
                timers: Arc::new(Mutex::new(HashMap::new())),
            },
            wake_rx,
        )
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl WakePlatform for LocalWakePlatform {
    async fn reserve(&self, wake: WakeRequest) -> Result<RegistrationId, PlatformError> {
        let registration = RegistrationId::new();
        let delay = (wake.fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let wake_tx = self.wake_tx.clone();
        let timers = Arc::clone(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut timers) = timers.lock() {
                timers.remove(&registration);
            }
            if wake_tx.send(wake).await.is_err() {
                tracing::debug!(registration = %registration, "Wake receiver dropped");
            }
        });

        self.timers
            .lock()
            .map_err(|_| PlatformError::Other("timer table lock poisoned".into()))?
            .insert(registration, task);

        Ok(registration)
    }

    async fn release(&self, registration: RegistrationId) -> Result<(), PlatformError> {
        let task = self
            .timers
            .lock()
            .map_err(|_| PlatformError::Other("timer table lock poisoned".into()))?
            .remove(&registration)
            .ok_or(PlatformError::UnknownRegistration(registration))?;
        task.abort();
        Ok(())
    }

    async fn is_registered(&self, registration: RegistrationId) -> bool {
        self.timers
            .lock()
            .map(|t| t.contains_key(&registration))
            .unwrap_or(false)
    }

    async fn extend_window(&self, requested: Duration) -> Result<Duration, PlatformError> {
        // In-process there is no OS budget; grant whatever was asked.
        Ok(requested)
    }

    fn declare_capabilities(&self, capabilities: &[BackgroundCapability]) {
        tracing::debug!(?capabilities, "Declared background capabilities");
    }
}
