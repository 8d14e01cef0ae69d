//! State shared by the audio port, the capture sinks and the monitor.

use crate::event::EventQueue;
use atomic_float::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use synthbus_core::{BusRegion, PeakMeter};

pub(crate) struct BusShared {
    pub(crate) bus: BusRegion,
    /// Whether the current frame round-trips. Set at the frame boundary.
    pub(crate) route_through: AtomicBool,
    /// OUT buffer index the current frame is written into.
    pub(crate) write_index: AtomicUsize,
    /// Samples written so far this frame, per channel.
    pub(crate) cursors: Vec<AtomicUsize>,
    /// Raw block peaks since the last monitor poll, per channel.
    pub(crate) peaks: Vec<PeakMeter>,
    pub(crate) events: EventQueue,
    /// A forced release that could not take the lock yet.
    pub(crate) release_latch: AtomicBool,
    pub(crate) port_claimed: AtomicBool,
    /// Master peaks reported by the host since the last publish.
    pub(crate) master: PeakMeter,
    reported_voices: AtomicU32,
    reported_cpu: AtomicF32,
    levels_reported: AtomicBool,
    /// Live monitors. While any exists it alone writes the smoothed master levels.
    pub(crate) monitors: AtomicUsize,
}

impl BusShared {
    pub(crate) fn new(bus: BusRegion) -> Self {
        let channels = bus.layout().channels();
        Self {
            bus,
            route_through: AtomicBool::new(false),
            write_index: AtomicUsize::new(0),
            cursors: (0..channels).map(|_| AtomicUsize::new(0)).collect(),
            peaks: (0..channels).map(|_| PeakMeter::new()).collect(),
            events: EventQueue::new(),
            release_latch: AtomicBool::new(false),
            port_claimed: AtomicBool::new(false),
            master: PeakMeter::new(),
            reported_voices: AtomicU32::new(0),
            reported_cpu: AtomicF32::new(0.0),
            levels_reported: AtomicBool::new(false),
            monitors: AtomicUsize::new(0),
        }
    }

    /// Queue host-reported levels for the next [`publish_master`](Self::publish_master).
    pub(crate) fn report_levels(&self, peak_l: f32, peak_r: f32, total_voices: u32, cpu_load: f32) {
        self.master.record(peak_l, peak_r);
        self.reported_voices.store(total_voices, Ordering::Relaxed);
        self.reported_cpu.store(cpu_load, Ordering::Relaxed);
        self.levels_reported.store(true, Ordering::Release);
    }

    /// Smooth the reported master peaks, raised to `captured` (the loudest
    /// channel), into the header. One smoothing step per call.
    pub(crate) fn publish_master(&self, captured_l: f32, captured_r: f32) -> bool {
        let (reported_l, reported_r) = self.master.take();
        let header = self.bus.header();
        let (voices, cpu) = if self.levels_reported.swap(false, Ordering::AcqRel) {
            (
                self.reported_voices.load(Ordering::Relaxed),
                self.reported_cpu.load(Ordering::Relaxed),
            )
        } else {
            (header.total_voices(), header.cpu_load())
        };

        let published = self.bus.update_levels(
            captured_l.max(reported_l),
            captured_r.max(reported_r),
            voices,
            cpu,
        );
        if !published {
            // Contended; keep the report for the next attempt.
            self.master.record(reported_l, reported_r);
            self.levels_reported.store(true, Ordering::Release);
        }
        published
    }

    pub(crate) fn channels(&self) -> usize {
        self.cursors.len()
    }
}
