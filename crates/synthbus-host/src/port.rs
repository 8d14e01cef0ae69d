//! Per-frame buffer exchange, driven from the audio callback.
//!
//! ```text
//! begin_frame ──► synth renders, sinks capture ──► finish_frame(output)
//!   │ boundary transitions (zero-timeout lock)       │ publish OUT, signal
//!   │ state sampled once                             │ bounded wait for IN
//!   └ route + write index for this frame             └ copy IN or stay direct
//! ```
//!
//! Nothing here logs or allocates; diagnostics go through the event queue.

use crate::event::{BusEvent, ReleaseReason};
use crate::shared::BusShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use synthbus_core::{
    BusConfig, Liveness, LivenessMonitor, Stage, TakeoverEvent, TakeoverState, TransitionResult,
    SAMPLES_PER_FRAME,
};

/// What happened to the frame handed to [`AudioPort::finish_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not round-tripped; the output buffer is untouched.
    Direct,
    /// The first `frames` frames of output replaced with the companion's
    /// processed audio. Frames past the buffer capacity keep their direct
    /// audio.
    Processed { read_index: usize, frames: usize },
    /// No processed frame within the timeout. Output untouched, release forced.
    TimedOut,
    /// Too many frames outstanding. Output untouched, release forced.
    Drifted { drift: u64 },
}

impl FrameOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, FrameOutcome::Processed { .. })
    }
}

/// The audio thread's end of the bus. One per host context.
pub struct AudioPort {
    shared: Option<Arc<BusShared>>,
    liveness: LivenessMonitor,
    frame_timeout: Duration,
    state: TakeoverState,
    session_active: bool,
    frames: usize,
    last_written: usize,
    zeros: Vec<f32>,
}

impl AudioPort {
    pub(crate) fn new(shared: Option<Arc<BusShared>>, config: &BusConfig) -> Self {
        let slot_samples = shared
            .as_ref()
            .map(|s| s.bus.layout().slot_samples())
            .unwrap_or(0);
        Self {
            shared,
            liveness: LivenessMonitor::new(config.drift_threshold),
            frame_timeout: config.frame_timeout(),
            state: TakeoverState::Direct,
            session_active: false,
            frames: 0,
            last_written: 0,
            zeros: vec![0.0; slot_samples],
        }
    }

    /// A port that always routes directly.
    pub fn disconnected() -> Self {
        Self::new(None, &BusConfig::default())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_some()
    }

    /// State sampled at the last frame boundary. Constant for the whole frame.
    pub fn state(&self) -> TakeoverState {
        self.state
    }

    /// Frames routed through the companion this frame (clamped to buffer
    /// capacity; the rest of a larger callback stays direct).
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// OUT buffer index published by the last round-tripped frame.
    pub fn last_written_index(&self) -> usize {
        self.last_written
    }

    #[inline]
    pub fn stamp(&self, stage: Stage) {
        if let Some(shared) = &self.shared {
            shared.bus.stamp(stage);
        }
    }

    /// Frame boundary: apply pending transitions, then sample the state that
    /// governs this whole frame.
    pub fn begin_frame(&mut self, frames: usize) -> TakeoverState {
        self.state = TakeoverState::Direct;
        self.frames = frames;

        let Some(shared) = self.shared.clone() else {
            return self.state;
        };
        let bus = &shared.bus;

        if !bus.is_active() {
            shared.route_through.store(false, Ordering::Release);
            self.session_active = false;
            return self.state;
        }

        Self::apply_boundary(&shared);

        let header = bus.header();
        let state = header.takeover_state();
        let through = state.routes_through_companion();

        if through && !self.session_active {
            bus.processed_ready().reset();
            self.liveness
                .reset(header.out_frame_counter(), header.in_frame_counter());
        }
        self.session_active = through;
        self.state = state;
        self.frames = frames.min(bus.layout().frame_capacity());

        if through {
            header.bump_heartbeat();
            shared
                .write_index
                .store(header.out_write_index(), Ordering::Release);
            for cursor in &shared.cursors {
                cursor.store(0, Ordering::Relaxed);
            }
        }
        shared.route_through.store(through, Ordering::Release);
        self.state
    }

    fn apply_boundary(shared: &BusShared) {
        let bus = &shared.bus;

        if shared.release_latch.load(Ordering::Acquire) {
            if let Some(guard) = bus.try_meta() {
                let result = bus.transition(&guard, TakeoverEvent::RequestRelease);
                drop(guard);
                shared.release_latch.store(false, Ordering::Release);
                Self::report(shared, result);
            }
        }

        if let Some(result) = bus.try_frame_boundary() {
            Self::report(shared, result);
        }
    }

    fn report(shared: &BusShared, result: TransitionResult) {
        if let TransitionResult::StateChanged { from, to } = result {
            shared.events.push(BusEvent::StateChanged { from, to });
        }
    }

    /// Publish the captured frame and, if the companion answers in time,
    /// replace `output` (interleaved stereo) with the processed audio.
    pub fn finish_frame(&mut self, output: &mut [f32]) -> FrameOutcome {
        if !self.state.routes_through_companion() {
            return FrameOutcome::Direct;
        }
        let Some(shared) = self.shared.clone() else {
            return FrameOutcome::Direct;
        };
        let bus = &shared.bus;
        let header = bus.header();
        let samples = self.frames * SAMPLES_PER_FRAME;

        // No more captures into this frame's slots.
        shared.route_through.store(false, Ordering::Release);

        // Channels that rendered short (or not at all) must not leak stale audio.
        let write_index = shared.write_index.load(Ordering::Acquire);
        for (channel, cursor) in shared.cursors.iter().enumerate() {
            let filled = cursor.load(Ordering::Relaxed);
            if filled < samples {
                bus.region().write_out_slot_at(
                    channel,
                    write_index,
                    filled,
                    &self.zeros[..samples - filled],
                );
            }
        }

        header.set_out_frame_samples(self.frames);
        bus.stamp(Stage::RegionWrite);
        self.last_written = header.swap_out_write_index();
        let sent = header.advance_out_frame_counter();
        bus.payload_ready().set();

        let deadline = Instant::now() + self.frame_timeout;
        let acknowledged = loop {
            if self.liveness.acknowledge(header.in_frame_counter()) {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            bus.processed_ready().wait(deadline - now);
        };

        let in_counter = header.in_frame_counter();
        if !acknowledged {
            let drift = self.liveness.drift(sent, in_counter);
            self.force_release(&shared, ReleaseReason::Timeout, sent, drift);
            return FrameOutcome::TimedOut;
        }
        if let Liveness::Drifted { drift } = self.liveness.check(sent, in_counter) {
            self.force_release(&shared, ReleaseReason::Drift, sent, drift);
            return FrameOutcome::Drifted { drift };
        }

        let read_index = header.in_write_index() ^ 1;
        header.set_in_read_index(read_index);
        let routed = samples.min(output.len());
        let n = (header.in_frame_samples() * SAMPLES_PER_FRAME).min(routed);
        bus.region().read_in_slot_into(read_index, &mut output[..n]);
        // A short answer pads the routed span only; the overflow stays direct.
        output[n..routed].fill(0.0);
        bus.stamp(Stage::RegionRead);

        FrameOutcome::Processed {
            read_index,
            frames: n / SAMPLES_PER_FRAME,
        }
    }

    fn force_release(&mut self, shared: &BusShared, reason: ReleaseReason, frame: u64, drift: u64) {
        shared.events.push(BusEvent::ForcedRelease {
            reason,
            frame,
            drift,
        });

        match shared.bus.try_meta() {
            Some(guard) => {
                let result = shared.bus.transition(&guard, TakeoverEvent::RequestRelease);
                drop(guard);
                Self::report(shared, result);
            }
            None => {
                shared.release_latch.store(true, Ordering::Release);
                shared.events.push(BusEvent::ReleaseDeferred { frame });
            }
        }
    }
}

impl Drop for AudioPort {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.route_through.store(false, Ordering::Release);
            shared.port_claimed.store(false, Ordering::Release);
        }
    }
}
