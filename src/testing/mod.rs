//! Testing utilities for users of the reveille library.
//!
//! This module provides helpers for testing alarm scheduling without a real
//! OS platform or audio driver:
//!
//! - [`MockWakePlatform`]: records reservations/releases, lets tests fire
//!   wakes manually, and can be scripted to deny registrations or window
//!   extensions
//! - [`RecordingAlertSink`]: captures alert activity instead of rendering it

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::core::types::{AlarmId, RegistrationId};
use crate::core::SoundProfile;
use crate::delivery::{AlertSink, DeliveryError};
use crate::platform::{BackgroundCapability, PlatformError, WakePlatform, WakeRequest};

/// Wake platform that records every call and never actually sleeps.
///
/// Tests drive wakes explicitly via [`MockWakePlatform::take_due`] or
/// [`MockWakePlatform::pending`], playing the role of the OS.
pub struct MockWakePlatform {
    registrations: RwLock<HashMap<RegistrationId, WakeRequest>>,
    reserve_calls: AtomicU32,
    release_calls: AtomicU32,
    extend_calls: AtomicU32,
    deny_reservations: AtomicBool,
    deny_extensions: AtomicBool,
}

impl MockWakePlatform {
    /// Create a permissive mock platform.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            reserve_calls: AtomicU32::new(0),
            release_calls: AtomicU32::new(0),
            extend_calls: AtomicU32::new(0),
            deny_reservations: AtomicBool::new(false),
            deny_extensions: AtomicBool::new(false),
        }
    }

    /// Make subsequent `reserve` calls fail with `Denied`.
    pub fn deny_reservations(&self, deny: bool) {
        self.deny_reservations.store(deny, Ordering::SeqCst);
    }

    /// Make subsequent `extend_window` calls fail with `Denied`.
    pub fn deny_extensions(&self, deny: bool) {
        self.deny_extensions.store(deny, Ordering::SeqCst);
    }

    /// Number of currently pending registrations.
    pub fn reserved_count(&self) -> usize {
        self.registrations.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Pending wake requests, in `fire_at` order.
    pub fn pending(&self) -> Vec<(RegistrationId, WakeRequest)> {
        let mut pending: Vec<_> = self
            .registrations
            .read()
            .map(|r| r.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default();
        pending.sort_by_key(|(_, wake)| wake.fire_at);
        pending
    }

    /// The pending wake for an alarm, if any.
    pub fn wake_for(&self, alarm_id: &AlarmId) -> Option<WakeRequest> {
        self.registrations
            .read()
            .ok()?
            .values()
            .find(|wake| &wake.alarm_id == alarm_id)
            .cloned()
    }

    /// Remove and return the earliest pending wake, as the OS would when it
    /// invokes the engine.
    pub fn take_due(&self) -> Option<WakeRequest> {
        let (registration, wake) = self.pending().into_iter().next()?;
        if let Ok(mut registrations) = self.registrations.write() {
            registrations.remove(&registration);
        }
        Some(wake)
    }

    /// Total number of registration mutations made (reserve + release).
    ///
    /// Idempotence assertions compare this before and after an operation;
    /// window extensions are tracked separately via `extend_calls`.
    pub fn total_calls(&self) -> u32 {
        self.reserve_calls.load(Ordering::SeqCst) + self.release_calls.load(Ordering::SeqCst)
    }

    /// Number of `reserve` calls made.
    pub fn reserve_calls(&self) -> u32 {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    /// Number of `extend_window` calls made.
    pub fn extend_calls(&self) -> u32 {
        self.extend_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockWakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WakePlatform for MockWakePlatform {
    async fn reserve(&self, wake: WakeRequest) -> Result<RegistrationId, PlatformError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_reservations.load(Ordering::SeqCst) {
            return Err(PlatformError::Denied("background refresh revoked".into()));
        }
        let registration = RegistrationId::new();
        self.registrations
            .write()
            .map_err(|_| PlatformError::Other("registration table lock poisoned".into()))?
            .insert(registration, wake);
        Ok(registration)
    }

    async fn release(&self, registration: RegistrationId) -> Result<(), PlatformError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.registrations
            .write()
            .map_err(|_| PlatformError::Other("registration table lock poisoned".into()))?
            .remove(&registration)
            .ok_or(PlatformError::UnknownRegistration(registration))?;
        Ok(())
    }

    async fn is_registered(&self, registration: RegistrationId) -> bool {
        self.registrations
            .read()
            .map(|r| r.contains_key(&registration))
            .unwrap_or(false)
    }

    async fn extend_window(&self, requested: Duration) -> Result<Duration, PlatformError> {
        self.extend_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_extensions.load(Ordering::SeqCst) {
            return Err(PlatformError::Denied("budget exhausted".into()));
        }
        Ok(requested)
    }

    fn declare_capabilities(&self, _capabilities: &[BackgroundCapability]) {}
}

/// Alert sink that records activity instead of rendering it.
pub struct RecordingAlertSink {
    started: AtomicU32,
    stopped: AtomicU32,
    volumes: RwLock<Vec<f32>>,
    profiles: RwLock<Vec<SoundProfile>>,
}

impl RecordingAlertSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self {
            started: AtomicU32::new(0),
            stopped: AtomicU32::new(0),
            volumes: RwLock::new(Vec::new()),
            profiles: RwLock::new(Vec::new()),
        }
    }

    /// Number of times `start` was called (one per delivery).
    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of times `stop` was called.
    pub fn stopped(&self) -> u32 {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Volume values in the order they were set.
    pub fn volumes(&self) -> Vec<f32> {
        self.volumes.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// Profiles passed to `start`, in order.
    pub fn profiles(&self) -> Vec<SoundProfile> {
        self.profiles.read().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for RecordingAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn start(&self, profile: &SoundProfile) -> Result<(), DeliveryError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.push(profile.clone());
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f32) {
        if let Ok(mut volumes) = self.volumes.write() {
            volumes.push(volume);
        }
    }

    async fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}
