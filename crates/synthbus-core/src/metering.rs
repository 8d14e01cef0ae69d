//! Peak metering with instant attack and exponential decay.

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

/// Per-update decay coefficient applied when the input falls below the stored peak.
pub const LEVEL_DECAY: f32 = 0.92;

/// Smooth a stored peak towards a new input.
///
/// Rising input replaces the peak; falling input decays it by `decay`.
/// Input is clamped to `[0, 1]`, NaN counts as silence.
#[inline]
pub fn smooth_peak(current: f32, input: f32, decay: f32) -> f32 {
    let input = if input.is_nan() {
        0.0
    } else {
        input.clamp(0.0, 1.0)
    };
    if input > current {
        input
    } else {
        current * decay
    }
}

/// Absolute peak of each side of an interleaved stereo block.
pub fn block_peaks(interleaved: &[f32]) -> (f32, f32) {
    let mut peak_l = 0.0f32;
    let mut peak_r = 0.0f32;
    for frame in interleaved.chunks_exact(2) {
        peak_l = peak_l.max(frame[0].abs());
        peak_r = peak_r.max(frame[1].abs());
    }
    (peak_l, peak_r)
}

/// Lock-free raw peak accumulator.
///
/// The audio thread records block peaks; the monitor takes and resets them
/// once per poll.
#[derive(Debug, Default)]
pub struct PeakMeter {
    left: AtomicF32,
    right: AtomicF32,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, peak_l: f32, peak_r: f32) {
        self.left.fetch_max(peak_l, Ordering::AcqRel);
        self.right.fetch_max(peak_r, Ordering::AcqRel);
    }

    pub fn record_block(&self, interleaved: &[f32]) {
        let (l, r) = block_peaks(interleaved);
        self.record(l, r);
    }

    pub fn peek(&self) -> (f32, f32) {
        (
            self.left.load(Ordering::Acquire),
            self.right.load(Ordering::Acquire),
        )
    }

    /// Read the peaks accumulated since the last call and reset them.
    pub fn take(&self) -> (f32, f32) {
        (
            self.left.swap(0.0, Ordering::AcqRel),
            self.right.swap(0.0, Ordering::AcqRel),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_attack_and_decay() {
        assert_eq!(smooth_peak(0.2, 0.8, LEVEL_DECAY), 0.8);
        assert_relative_eq!(smooth_peak(0.8, 0.1, LEVEL_DECAY), 0.8 * 0.92);
        assert_relative_eq!(smooth_peak(0.5, 0.5, LEVEL_DECAY), 0.5 * 0.92);
    }

    #[test]
    fn test_input_is_clamped() {
        assert_eq!(smooth_peak(0.0, 3.0, LEVEL_DECAY), 1.0);
        assert_eq!(smooth_peak(0.0, -1.0, LEVEL_DECAY), 0.0);
        assert_relative_eq!(smooth_peak(0.5, f32::NAN, LEVEL_DECAY), 0.5 * LEVEL_DECAY);
    }

    #[test]
    fn test_block_peaks() {
        let block = [0.5, -0.25, -0.75, 0.1, 0.2, 0.0];
        assert_eq!(block_peaks(&block), (0.75, 0.25));
        assert_eq!(block_peaks(&[]), (0.0, 0.0));
        // Trailing odd sample ignored
        assert_eq!(block_peaks(&[0.1, 0.2, 0.9]), (0.1, 0.2));
    }

    #[test]
    fn test_peak_meter_take_resets() {
        let meter = PeakMeter::new();
        meter.record(0.3, 0.1);
        meter.record_block(&[0.2, -0.6]);
        assert_eq!(meter.peek(), (0.3, 0.6));
        assert_eq!(meter.take(), (0.3, 0.6));
        assert_eq!(meter.take(), (0.0, 0.0));
    }

    proptest! {
        #[test]
        fn smoothing_is_attack_or_decay(current in 0.0f32..=1.0, input in 0.0f32..=1.0) {
            let next = smooth_peak(current, input, LEVEL_DECAY);
            if input > current {
                prop_assert_eq!(next, input);
            } else {
                prop_assert_eq!(next, current * LEVEL_DECAY);
            }
            prop_assert!((0.0..=1.0).contains(&next));
        }
    }
}
