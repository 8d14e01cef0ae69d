//! Attaching to a host's region and serving its frames.

use crate::effect::{ChannelFrames, Effect};
use crate::error::{CompanionError, Result};
use std::time::Duration;
use synthbus_control::{ControlChannel, RegionChannel, Request};
use synthbus_core::sync::{current_pid, process_alive};
use synthbus_core::{
    BusConfig, BusRegion, LatencySnapshot, TakeoverRequest, TakeoverState, SAMPLES_PER_FRAME,
};
use tracing::{debug, info, warn};

/// Result of one [`CompanionBus::serve_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// A frame was processed and handed back.
    Served { read_index: usize, frames: usize },
    /// Nothing arrived within the wait.
    Idle,
    /// The host shut the bus down or its process is gone.
    HostGone,
}

/// The companion's attachment to a host's audio bus.
pub struct CompanionBus {
    bus: BusRegion,
    inputs: Vec<Vec<f32>>,
    output: Vec<f32>,
    served: u64,
}

impl CompanionBus {
    /// Map the host's region. Refuses any region with foreign magic,
    /// version or size, and regions whose host is not running.
    pub fn attach(config: &BusConfig) -> Result<Self> {
        let bus = match BusRegion::open(config) {
            Ok(bus) => bus,
            Err(e) => {
                if e.is_protocol_mismatch() {
                    warn!("Refusing incompatible audio bus: {}", e);
                }
                return Err(e.into());
            }
        };

        let header = bus.header();
        let owner_pid = header.owner_pid();
        if !bus.is_active() || !process_alive(owner_pid) {
            return Err(CompanionError::HostInactive { owner_pid });
        }

        header.set_companion_pid(current_pid());
        let layout = *bus.layout();
        info!(
            owner_pid,
            channels = layout.channels(),
            frame_capacity = layout.frame_capacity(),
            sample_rate = header.sample_rate(),
            "Attached to audio bus"
        );

        Ok(Self {
            inputs: vec![vec![0.0; layout.slot_samples()]; layout.channels()],
            output: vec![0.0; layout.frame_capacity() * SAMPLES_PER_FRAME],
            served: 0,
            bus,
        })
    }

    /// Channels offered by a running host, or 0 when none can be attached.
    pub fn available_channels(config: &BusConfig) -> usize {
        match Self::attach(config) {
            Ok(companion) => companion.channels(),
            Err(e) => {
                debug!("No audio bus available: {}", e);
                0
            }
        }
    }

    pub fn bus(&self) -> &BusRegion {
        &self.bus
    }

    pub fn channels(&self) -> usize {
        self.bus.layout().channels()
    }

    pub fn frame_capacity(&self) -> usize {
        self.bus.layout().frame_capacity()
    }

    pub fn sample_rate(&self) -> u32 {
        self.bus.header().sample_rate()
    }

    pub fn host_pid(&self) -> u32 {
        self.bus.header().owner_pid()
    }

    pub fn state(&self) -> TakeoverState {
        self.bus.takeover_state()
    }

    pub fn frames_served(&self) -> u64 {
        self.served
    }

    pub fn host_alive(&self) -> bool {
        self.bus.is_active() && process_alive(self.host_pid())
    }

    /// Ask the host to route audio through this companion. Applied by the
    /// host's monitor and effective at a later frame boundary.
    pub fn request_takeover(&self) -> u32 {
        let seq = self
            .bus
            .header()
            .post_companion_request(TakeoverRequest::Takeover);
        info!(seq, "Requested takeover");
        seq
    }

    pub fn request_release(&self) -> u32 {
        let seq = self
            .bus
            .header()
            .post_companion_request(TakeoverRequest::Release);
        info!(seq, "Requested release");
        seq
    }

    pub fn set_effects_loaded(&self, loaded: bool) -> Result<()> {
        self.bus.set_effects_loaded(loaded)?;
        Ok(())
    }

    /// Silence the host synth through the region flags and wait for its ack.
    pub fn panic(&self, timeout: Duration) -> Result<()> {
        RegionChannel::new(&self.bus).call(&Request::Panic, timeout)?;
        Ok(())
    }

    pub fn latency(&self) -> LatencySnapshot {
        self.bus.latency_snapshot()
    }

    /// Wait up to `timeout` for the host's next frame, run it through
    /// `effect` and publish the result.
    pub fn serve_frame(&mut self, effect: &mut dyn Effect, timeout: Duration) -> ServeOutcome {
        if !self.bus.is_active() {
            return ServeOutcome::HostGone;
        }
        if !self.bus.payload_ready().wait(timeout) {
            return if self.host_alive() {
                ServeOutcome::Idle
            } else {
                ServeOutcome::HostGone
            };
        }
        // Shutdown also raises the signal.
        if !self.bus.is_active() {
            return ServeOutcome::HostGone;
        }

        let header = self.bus.header();
        let frames = header.out_frame_samples().min(self.frame_capacity());
        let samples = frames * SAMPLES_PER_FRAME;

        let read_index = header.out_write_index() ^ 1;
        header.set_out_read_index(read_index);
        for (channel, input) in self.inputs.iter_mut().enumerate() {
            self.bus
                .region()
                .read_out_slot_into(channel, read_index, &mut input[..samples]);
        }

        let output = &mut self.output[..samples];
        output.fill(0.0);
        effect.process(&ChannelFrames::new(&self.inputs, frames), output);

        // Buffer complete before the index flips.
        let write_index = header.in_write_index();
        self.bus.region().write_in_slot(write_index, output);
        header.set_in_frame_samples(frames);
        header.swap_in_write_index();
        header.advance_in_frame_counter();
        self.bus.processed_ready().set();

        self.served += 1;
        ServeOutcome::Served { read_index, frames }
    }

    /// Clear the companion pid. Dropping does the same.
    pub fn detach(self) {}
}

impl Drop for CompanionBus {
    fn drop(&mut self) {
        let header = self.bus.header();
        if header.companion_pid() == current_pid() {
            header.set_companion_pid(0);
        }
        debug!(served = self.served, "Detached from audio bus");
    }
}
