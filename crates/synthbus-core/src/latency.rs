//! Pipeline timestamps.
//!
//! Each stage stamps a monotonic tick count into the header. Readers convert
//! tick deltas with the published clock frequency, so they never need to know
//! the host's clock source. Nothing here affects the takeover protocol.

use crate::header::Header;

/// Ticks per second of [`LatencyClock::now_ticks`].
pub const CLOCK_FREQUENCY: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MidiIn,
    SynthComplete,
    RegionWrite,
    RegionRead,
    DeviceOutput,
}

/// Monotonic nanosecond clock, comparable across processes on the same machine.
pub struct LatencyClock;

impl LatencyClock {
    pub fn frequency() -> u64 {
        CLOCK_FREQUENCY
    }

    #[cfg(unix)]
    pub fn now_ticks() -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid out pointer; CLOCK_MONOTONIC is always available.
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        (ts.tv_sec as u64)
            .saturating_mul(CLOCK_FREQUENCY)
            .saturating_add(ts.tv_nsec as u64)
    }

    /// Process-local epoch; only meaningful when both sides share a process.
    #[cfg(not(unix))]
    pub fn now_ticks() -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Convert a tick interval to microseconds.
///
/// Returns 0 for an unknown frequency or a reversed interval.
pub fn ticks_to_micros(start: u64, end: u64, frequency: u64) -> u64 {
    if frequency == 0 || end < start {
        return 0;
    }
    ((end - start) as u128 * 1_000_000 / frequency as u128) as u64
}

/// All stage stamps read from one header, plus derived intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub frequency: u64,
    pub midi_in: u64,
    pub synth_complete: u64,
    pub region_write: u64,
    pub region_read: u64,
    pub device_output: u64,
}

impl LatencySnapshot {
    pub fn capture(header: &Header<'_>) -> Self {
        Self {
            frequency: header.clock_frequency(),
            midi_in: header.stamp_of(Stage::MidiIn),
            synth_complete: header.stamp_of(Stage::SynthComplete),
            region_write: header.stamp_of(Stage::RegionWrite),
            region_read: header.stamp_of(Stage::RegionRead),
            device_output: header.stamp_of(Stage::DeviceOutput),
        }
    }

    /// Shared-region write to read-back, i.e. time spent in the companion.
    pub fn round_trip_us(&self) -> u64 {
        ticks_to_micros(self.region_write, self.region_read, self.frequency)
    }

    pub fn synth_to_output_us(&self) -> u64 {
        ticks_to_micros(self.synth_complete, self.device_output, self.frequency)
    }

    pub fn midi_to_output_us(&self) -> u64 {
        ticks_to_micros(self.midi_in, self.device_output, self.frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_micros() {
        assert_eq!(ticks_to_micros(0, 1_000_000, 1_000_000_000), 1000);
        assert_eq!(ticks_to_micros(10, 10, 1_000_000_000), 0);
        assert_eq!(ticks_to_micros(0, 48_000, 48_000), 1_000_000);
    }

    #[test]
    fn test_ticks_to_micros_degenerate() {
        assert_eq!(ticks_to_micros(0, 1000, 0), 0);
        assert_eq!(ticks_to_micros(2000, 1000, 1_000_000_000), 0);
        // No overflow for large deltas
        assert_eq!(
            ticks_to_micros(0, u64::MAX, u64::MAX),
            1_000_000
        );
    }

    #[test]
    fn test_clock_is_monotonic() {
        let a = LatencyClock::now_ticks();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = LatencyClock::now_ticks();
        assert!(b > a);
        assert!(ticks_to_micros(a, b, LatencyClock::frequency()) >= 2000);
    }

    #[test]
    fn test_snapshot_derivations() {
        let snapshot = LatencySnapshot {
            frequency: 1_000_000,
            midi_in: 100,
            synth_complete: 200,
            region_write: 300,
            region_read: 1300,
            device_output: 2200,
        };
        assert_eq!(snapshot.round_trip_us(), 1000);
        assert_eq!(snapshot.synth_to_output_us(), 2000);
        assert_eq!(snapshot.midi_to_output_us(), 2100);
        assert_eq!(LatencySnapshot::default().round_trip_us(), 0);
    }
}
