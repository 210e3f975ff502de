//! Alert rendering boundary.
//!
//! The [`AlertSink`] trait abstracts the concrete audio/vibration driver;
//! the engine only decides *when* and *how loud*. [`LogAlertSink`] is the
//! host binary's sink: it narrates the alert through tracing.

use async_trait::async_trait;

use super::DeliveryError;
use crate::core::SoundProfile;

/// Renders the audible/visible alert.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Begin rendering the given profile at zero volume.
    async fn start(&self, profile: &SoundProfile) -> Result<(), DeliveryError>;

    /// Adjust the rendering volume (`0.0..=1.0`).
    async fn set_volume(&self, volume: f32);

    /// Stop rendering.
    async fn stop(&self);
}

/// Sink that logs alert activity instead of producing sound.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn start(&self, profile: &SoundProfile) -> Result<(), DeliveryError> {
        tracing::info!(
            asset = %profile.asset,
            loop_audio = profile.loop_audio,
            vibrate = profile.vibrate,
            "ALARM: starting alert"
        );
        Ok(())
    }

    async fn set_volume(&self, volume: f32) {
        tracing::debug!(volume, "ALARM: volume");
    }

    async fn stop(&self) {
        tracing::info!("ALARM: alert stopped");
    }
}
