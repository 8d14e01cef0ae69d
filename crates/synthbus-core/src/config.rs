//! Bus configuration.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Well-known name of the shared audio mapping.
pub const DEFAULT_REGION_NAME: &str = "SynthBus_AudioBus";
/// Well-known name of the metadata mutex.
pub const DEFAULT_MUTEX_NAME: &str = "SynthBus_AudioBusMutex";
/// Base name for the per-instance wake signals (suffixed with the host pid).
pub const DEFAULT_SIGNAL_BASE_NAME: &str = "SynthBus_Signal";

pub const DEFAULT_CHANNELS: u32 = 16;
pub const DEFAULT_FRAME_CAPACITY: u32 = 256;

/// Upper bound on channels so the header stays a few kilobytes.
pub const MAX_CHANNELS: u32 = 256;
/// Upper bound on frames per buffer.
pub const MAX_FRAME_CAPACITY: u32 = 16384;

/// Configuration shared by the host and the companion.
///
/// Both sides must agree on the names and `shm_dir`. The format fields
/// (`channels`, `frame_capacity`, `sample_rate`) are only used by the host when
/// creating the region; a companion reads them from the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub region_name: String,
    pub mutex_name: String,
    pub signal_base_name: String,
    /// Directory holding the mapped files. `None` selects the platform default.
    pub shm_dir: Option<PathBuf>,
    pub channels: u32,
    pub frame_capacity: u32,
    pub sample_rate: u32,
    /// Per-frame wait for processed audio before the companion is declared failed.
    pub frame_timeout_ms: u64,
    /// Frames the host may run ahead of the companion before a forced release.
    pub drift_threshold: u64,
    /// Bounded metadata lock wait for non-real-time callers.
    pub lock_timeout_ms: u64,
    /// Monitoring thread period.
    pub poll_interval_ms: u64,
    /// Identifier of the device output backend, published for readers.
    pub audio_backend: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            region_name: DEFAULT_REGION_NAME.to_string(),
            mutex_name: DEFAULT_MUTEX_NAME.to_string(),
            signal_base_name: DEFAULT_SIGNAL_BASE_NAME.to_string(),
            shm_dir: None,
            channels: DEFAULT_CHANNELS,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            sample_rate: 48000,
            frame_timeout_ms: 20,
            drift_threshold: 3,
            lock_timeout_ms: 10,
            poll_interval_ms: 10,
            audio_backend: 0,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(BusError::InvalidConfig(format!(
                "channels {} out of range (1-{})",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.frame_capacity == 0 || self.frame_capacity > MAX_FRAME_CAPACITY {
            return Err(BusError::InvalidConfig(format!(
                "frame_capacity {} out of range (1-{})",
                self.frame_capacity, MAX_FRAME_CAPACITY
            )));
        }
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(BusError::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.frame_timeout_ms == 0 {
            return Err(BusError::InvalidConfig(
                "frame_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.drift_threshold == 0 {
            return Err(BusError::InvalidConfig(
                "drift_threshold must be > 0".to_string(),
            ));
        }
        for name in [&self.region_name, &self.mutex_name, &self.signal_base_name] {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(BusError::InvalidConfig(format!(
                    "invalid object name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Directory the named objects live in.
    pub fn object_dir(&self) -> PathBuf {
        if let Some(dir) = &self.shm_dir {
            return dir.clone();
        }

        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/dev/shm")
        }

        #[cfg(not(target_os = "linux"))]
        {
            std::env::temp_dir()
        }
    }

    pub fn region_path(&self) -> PathBuf {
        self.object_dir().join(&self.region_name)
    }

    pub fn mutex_path(&self) -> PathBuf {
        self.object_dir().join(&self.mutex_name)
    }

    /// Host to companion wake signal for a given host instance.
    pub fn payload_ready_path(&self, host_pid: u32) -> PathBuf {
        self.object_dir()
            .join(format!("{}_PayloadReady_{}", self.signal_base_name, host_pid))
    }

    /// Companion to host wake signal for a given host instance.
    pub fn processed_ready_path(&self, host_pid: u32) -> PathBuf {
        self.object_dir()
            .join(format!("{}_ProcessedReady_{}", self.signal_base_name, host_pid))
    }
}
