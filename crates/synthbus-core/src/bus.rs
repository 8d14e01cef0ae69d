//! Owned handle set for one audio bus: region, metadata mutex and both signals.

use crate::config::BusConfig;
use crate::error::Result;
use crate::header::{BusFlags, Header};
use crate::latency::{LatencyClock, LatencySnapshot, Stage};
use crate::layout::RegionLayout;
use crate::metering::{smooth_peak, LEVEL_DECAY};
use crate::region::SharedRegion;
use crate::sync::{current_pid, MutexGuard, NamedMutex, Signal};
use crate::takeover::{TakeoverEvent, TakeoverMachine, TakeoverState, TransitionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates and owns every named object.
    Host,
    /// Opens objects created by a host.
    Companion,
}

/// Everything one side needs to talk over the bus.
///
/// The host creates the objects and marks the region inactive on drop. A
/// companion only opens them and never changes the region's format.
pub struct BusRegion {
    config: BusConfig,
    role: Role,
    region: SharedRegion,
    mutex: NamedMutex,
    payload_ready: Signal,
    processed_ready: Signal,
    shut_down: AtomicBool,
}

impl BusRegion {
    /// Create all named objects and mark the region active.
    pub fn create(config: &BusConfig) -> Result<Self> {
        let region = SharedRegion::create(config)?;
        let mutex = NamedMutex::create(&config.mutex_path(), &config.mutex_name)?;

        let pid = current_pid();
        let payload_ready = Signal::create(&config.payload_ready_path(pid))?;
        let processed_ready = Signal::create(&config.processed_ready_path(pid))?;

        let bus = Self {
            config: config.clone(),
            role: Role::Host,
            region,
            mutex,
            payload_ready,
            processed_ready,
            shut_down: AtomicBool::new(false),
        };

        {
            let guard = bus.meta()?;
            let header = bus.header();
            header.set_flags(&guard, BusFlags::ACTIVE);
            header.touch(&guard, wall_clock_ms());
        }

        tracing::info!(
            region = %bus.region.path().display(),
            channels = bus.layout().channels(),
            frame_capacity = bus.layout().frame_capacity(),
            "Audio bus created"
        );
        Ok(bus)
    }

    /// Attach to a region created by a running host.
    ///
    /// Fails on any magic, version or size mismatch before a buffer is touched.
    pub fn open(config: &BusConfig) -> Result<Self> {
        let region = SharedRegion::open(config)?;
        let mutex = NamedMutex::open(&config.mutex_path(), &config.mutex_name)?;

        let host_pid = region.header().owner_pid();
        let payload_ready = Signal::open(&config.payload_ready_path(host_pid))?;
        let processed_ready = Signal::open(&config.processed_ready_path(host_pid))?;

        tracing::debug!(host_pid, "Attached to audio bus");
        Ok(Self {
            config: config.clone(),
            role: Role::Companion,
            region,
            mutex,
            payload_ready,
            processed_ready,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn header(&self) -> Header<'_> {
        self.region.header()
    }

    pub fn layout(&self) -> &RegionLayout {
        self.region.layout()
    }

    /// Host to companion: an OUT frame was published.
    pub fn payload_ready(&self) -> &Signal {
        &self.payload_ready
    }

    /// Companion to host: an IN frame was published.
    pub fn processed_ready(&self) -> &Signal {
        &self.processed_ready
    }

    pub fn flags(&self) -> BusFlags {
        self.header().flags()
    }

    pub fn is_active(&self) -> bool {
        self.flags().contains(BusFlags::ACTIVE)
    }

    pub fn takeover_state(&self) -> TakeoverState {
        self.header().takeover_state()
    }

    /// Zero-timeout metadata lock, for the audio thread.
    pub fn try_meta(&self) -> Option<MutexGuard<'_>> {
        self.mutex.try_lock()
    }

    /// Metadata lock bounded by the configured timeout.
    pub fn meta(&self) -> Result<MutexGuard<'_>> {
        self.mutex.lock_timeout(self.config.lock_timeout())
    }

    pub fn meta_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_>> {
        self.mutex.lock_timeout(timeout)
    }

    // ---------------------------------------------------------------------
    // Takeover
    // ---------------------------------------------------------------------

    /// Apply one event to the stored state machine.
    ///
    /// Entering `Active` enables audio; leaving `Releasing` disables it.
    pub fn transition(&self, guard: &MutexGuard<'_>, event: TakeoverEvent) -> TransitionResult {
        let header = self.header();
        let mut machine =
            TakeoverMachine::from_parts(header.takeover_state(), header.queued_request());
        let result = machine.transition(event);

        header.set_takeover_state(guard, machine.state());
        header.set_queued_request(guard, machine.queued());

        if let TransitionResult::StateChanged { from, to } = result {
            if to == TakeoverState::Active {
                header.insert_flags(guard, BusFlags::AUDIO_ENABLED);
            } else if from == TakeoverState::Releasing {
                header.remove_flags(guard, BusFlags::AUDIO_ENABLED);
            }
        }
        result
    }

    /// Bounded-lock takeover request. State is unchanged on lock timeout.
    pub fn request_takeover(&self) -> Result<TransitionResult> {
        let guard = self.meta()?;
        Ok(self.transition(&guard, TakeoverEvent::RequestTakeover))
    }

    pub fn request_release(&self) -> Result<TransitionResult> {
        let guard = self.meta()?;
        Ok(self.transition(&guard, TakeoverEvent::RequestRelease))
    }

    /// Frame-boundary step for the audio thread. `None` when the lock is contended.
    pub fn try_frame_boundary(&self) -> Option<TransitionResult> {
        let guard = self.try_meta()?;
        Some(self.transition(&guard, TakeoverEvent::FrameBoundary))
    }

    // ---------------------------------------------------------------------
    // Levels and voices
    // ---------------------------------------------------------------------

    /// Smoothed master levels. Skipped on contention; returns whether applied.
    pub fn update_levels(&self, peak_l: f32, peak_r: f32, total_voices: u32, cpu_load: f32) -> bool {
        let Some(guard) = self.try_meta() else {
            return false;
        };
        let header = self.header();
        let (cur_l, cur_r) = header.master_peaks();
        header.set_master(
            &guard,
            smooth_peak(cur_l, peak_l, LEVEL_DECAY),
            smooth_peak(cur_r, peak_r, LEVEL_DECAY),
            total_voices,
            cpu_load,
        );
        header.touch(&guard, wall_clock_ms());
        true
    }

    pub fn update_channel_levels(&self, channel: usize, peak_l: f32, peak_r: f32) -> bool {
        let header = self.header();
        let Some(current) = header.channel(channel) else {
            return false;
        };
        let Some(guard) = self.try_meta() else {
            return false;
        };
        header.set_channel_peaks(
            &guard,
            channel,
            smooth_peak(current.peak_l, peak_l, LEVEL_DECAY),
            smooth_peak(current.peak_r, peak_r, LEVEL_DECAY),
        );
        true
    }

    pub fn update_channel_voices(&self, channel: usize, voices: u32) -> bool {
        if channel >= self.layout().channels() {
            return false;
        }
        let Some(guard) = self.try_meta() else {
            return false;
        };
        self.header().set_channel_voices(&guard, channel, voices);
        true
    }

    /// Set every channel's voice count and the derived total.
    ///
    /// Extra entries are ignored; missing channels count as zero.
    pub fn update_all_channel_voices(&self, voices: &[u32]) -> bool {
        let Some(guard) = self.try_meta() else {
            return false;
        };
        let header = self.header();
        let mut total = 0u32;
        for channel in 0..self.layout().channels() {
            let count = voices.get(channel).copied().unwrap_or(0);
            header.set_channel_voices(&guard, channel, count);
            total = total.saturating_add(count);
        }
        header.set_total_voices(&guard, total);
        true
    }

    /// Device rate change. Bounded wait, not for the audio thread.
    pub fn set_sample_rate(&self, sample_rate: u32) -> Result<()> {
        let guard = self.meta()?;
        let header = self.header();
        header.set_sample_rate(&guard, sample_rate);
        header.touch(&guard, wall_clock_ms());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Panic handshake
    // ---------------------------------------------------------------------

    /// Companion side: ask the host to silence all voices.
    pub fn request_panic(&self) -> Result<()> {
        let guard = self.meta()?;
        let header = self.header();
        header.insert_flags(&guard, BusFlags::PANIC_REQUEST);
        header.remove_flags(&guard, BusFlags::PANIC_ACK);
        Ok(())
    }

    /// Host side, zero-timeout.
    pub fn panic_requested(&self) -> bool {
        let Some(_guard) = self.try_meta() else {
            return false;
        };
        self.flags().contains(BusFlags::PANIC_REQUEST)
    }

    pub fn acknowledge_panic(&self) -> bool {
        let Some(guard) = self.try_meta() else {
            return false;
        };
        let header = self.header();
        header.remove_flags(&guard, BusFlags::PANIC_REQUEST);
        header.insert_flags(&guard, BusFlags::PANIC_ACK);
        true
    }

    /// [`acknowledge_panic`](Self::acknowledge_panic) with the bounded lock,
    /// for callers off the audio thread.
    pub fn acknowledge_panic_bounded(&self) -> Result<()> {
        let guard = self.meta()?;
        let header = self.header();
        header.remove_flags(&guard, BusFlags::PANIC_REQUEST);
        header.insert_flags(&guard, BusFlags::PANIC_ACK);
        Ok(())
    }

    pub fn panic_acknowledged(&self) -> bool {
        self.flags().contains(BusFlags::PANIC_ACK)
    }

    pub fn clear_panic_ack(&self) -> Result<()> {
        let guard = self.meta()?;
        self.header().remove_flags(&guard, BusFlags::PANIC_ACK);
        Ok(())
    }

    /// Companion side: advertise whether an effect chain is loaded.
    pub fn set_effects_loaded(&self, loaded: bool) -> Result<()> {
        let guard = self.meta()?;
        let header = self.header();
        if loaded {
            header.insert_flags(&guard, BusFlags::EFFECTS_LOADED);
        } else {
            header.remove_flags(&guard, BusFlags::EFFECTS_LOADED);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Latency
    // ---------------------------------------------------------------------

    /// Stamp a pipeline stage. Each stage has exactly one writer.
    #[inline]
    pub fn stamp(&self, stage: Stage) {
        self.header().stamp(stage, LatencyClock::now_ticks());
    }

    pub fn latency_snapshot(&self) -> LatencySnapshot {
        LatencySnapshot::capture(&self.header())
    }

    pub fn update_latency_info(&self, output_us: u32, input_us: u32, backend: u32) -> bool {
        let Some(guard) = self.try_meta() else {
            return false;
        };
        self.header()
            .set_latency_info(&guard, output_us, input_us, backend);
        true
    }

    /// Publish derived microsecond latencies from the current stamps.
    pub fn publish_derived_latency(&self) -> bool {
        let snapshot = self.latency_snapshot();
        let Some(guard) = self.try_meta() else {
            return false;
        };
        self.header().set_derived_latency(
            &guard,
            clamp_u32(snapshot.round_trip_us()),
            clamp_u32(snapshot.synth_to_output_us()),
        );
        true
    }

    /// Host only: clear every flag and drop back to direct. Idempotent.
    ///
    /// The objects stay mapped until drop, so a companion still attached sees
    /// the region go inactive rather than disappear.
    pub fn shutdown(&self) {
        if self.role != Role::Host || self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.meta() {
            Ok(guard) => {
                let header = self.header();
                header.set_flags(&guard, BusFlags::empty());
                header.set_takeover_state(&guard, TakeoverState::Direct);
                header.set_queued_request(&guard, crate::takeover::TakeoverRequest::None);
                header.touch(&guard, wall_clock_ms());
            }
            Err(e) => {
                tracing::warn!("Could not mark audio bus inactive: {}", e);
            }
        }
        // Release any companion blocked on a frame.
        self.payload_ready.set();
        tracing::info!("Audio bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for BusRegion {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
