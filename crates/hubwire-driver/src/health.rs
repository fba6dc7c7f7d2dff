use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{DriverError, Result};

/// Whether the Hub has been heard from since the transport was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommsState {
    Unknown,
    Healthy,
}

/// Point-in-time copy of [`CommsHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub state: CommsState,
    pub frames_received: u64,
    pub keepalives: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
    pub dropped_frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Comms health shared by the background threads and the foreground.
///
/// The receiver and transmitter have no caller to return errors to; they
/// report here instead.
#[derive(Debug, Default)]
pub struct CommsHealth {
    heard: AtomicBool,
    frames: AtomicU64,
    keepalives: AtomicU64,
    protocol_errors: AtomicU64,
    transport_errors: AtomicU64,
    dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl CommsHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.mark_heard();
    }

    pub fn record_keepalive(&self) {
        self.keepalives.fetch_add(1, Ordering::Relaxed);
        self.mark_heard();
    }

    pub fn record_protocol_error(&self, err: &DriverError) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "protocol error");
        self.set_last_error(err.to_string());
    }

    pub fn record_transport_error(&self, err: &DriverError) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        error!(error = %err, "transport error");
        self.set_last_error(err.to_string());
    }

    /// A frame that could not be delivered anywhere.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state(&self) -> CommsState {
        if self.heard.load(Ordering::Acquire) {
            CommsState::Healthy
        } else {
            CommsState::Unknown
        }
    }

    /// Fails with [`DriverError::NotResponding`] until the first frame arrives.
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CommsState::Healthy => Ok(()),
            CommsState::Unknown => Err(DriverError::NotResponding),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_error = match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        HealthSnapshot {
            state: self.state(),
            frames_received: self.frames.load(Ordering::Relaxed),
            keepalives: self.keepalives.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            dropped_frames: self.dropped.load(Ordering::Relaxed),
            last_error,
        }
    }

    fn mark_heard(&self) {
        if !self.heard.swap(true, Ordering::AcqRel) {
            info!("hub is responding");
        }
    }

    fn set_last_error(&self, message: String) {
        match self.last_error.lock() {
            Ok(mut guard) => *guard = Some(message),
            Err(poisoned) => *poisoned.into_inner() = Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_first_frame() {
        let health = CommsHealth::new();
        assert_eq!(health.state(), CommsState::Unknown);
        let err = health.check().unwrap_err();
        assert_eq!(err.to_string(), "Hub not responding");

        health.record_frame();
        assert!(health.check().is_ok());
    }

    #[test]
    fn keepalive_counts_as_heard() {
        let health = CommsHealth::new();
        health.record_keepalive();
        assert_eq!(health.state(), CommsState::Healthy);
        assert_eq!(health.snapshot().frames_received, 0);
    }

    #[test]
    fn errors_do_not_mark_healthy() {
        let health = CommsHealth::new();
        health.record_protocol_error(&DriverError::Protocol("bad hub id".into()));
        health.record_transport_error(&DriverError::Shutdown);
        health.record_dropped();

        let snap = health.snapshot();
        assert_eq!(snap.state, CommsState::Unknown);
        assert_eq!(snap.protocol_errors, 1);
        assert_eq!(snap.transport_errors, 1);
        assert_eq!(snap.dropped_frames, 1);
        assert_eq!(snap.last_error.as_deref(), Some("driver shut down"));
    }

    #[test]
    fn snapshot_serializes() {
        let health = CommsHealth::new();
        health.record_frame();
        let json = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(json["state"], "healthy");
        assert_eq!(json["frames_received"], 1);
        assert!(json.get("last_error").is_none());
    }
}
