//! Fixtures shared by the end-to-end tests.
//!
//! Every test gets its own temporary object directory, so hosts and
//! companions from parallel tests never see each other's regions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use synthbus::prelude::*;
use synthbus::{ChannelCapture, HostBus};
use tempfile::TempDir;

pub const TEST_CHANNELS: u32 = 2;
pub const TEST_FRAME_CAPACITY: u32 = 64;
pub const TEST_TIMEOUT_MS: u64 = 20;

pub fn test_config(dir: &TempDir) -> BusConfig {
    BusConfig {
        shm_dir: Some(dir.path().to_path_buf()),
        channels: TEST_CHANNELS,
        frame_capacity: TEST_FRAME_CAPACITY,
        frame_timeout_ms: TEST_TIMEOUT_MS,
        poll_interval_ms: 2,
        ..Default::default()
    }
}

pub fn test_host(config: &BusConfig) -> HostBus {
    let mut host = HostBus::new(config.clone());
    host.create().expect("Failed to create host bus");
    host
}

/// Stand-in synth: forwards rendered blocks to whatever sinks were registered.
#[derive(Default)]
pub struct FakeSynth {
    pub channels: usize,
    sinks: Vec<Option<Arc<dyn SampleSink>>>,
}

impl FakeSynth {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            sinks: vec![None; channels],
        }
    }

    pub fn render(&self, channel: usize, block: &[f32]) {
        if let Some(Some(sink)) = self.sinks.get(channel) {
            sink.capture(block);
        }
    }
}

impl ChannelCapture for FakeSynth {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn register_sink(&mut self, channel: usize, sink: Arc<dyn SampleSink>) {
        if let Some(slot) = self.sinks.get_mut(channel) {
            *slot = Some(sink);
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Drive the host into ACTIVE: apply the takeover directly, then cross a boundary.
pub fn activate(host: &HostBus, port: &mut AudioPort, frames: usize) {
    host.bus()
        .expect("host not connected")
        .request_takeover()
        .expect("takeover lock timed out");
    assert_eq!(port.begin_frame(frames), TakeoverState::Active);
}
