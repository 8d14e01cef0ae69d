//! Companion liveness: per-frame acknowledgements and cumulative drift.
//!
//! The host compares the OUT frame counter (frames sent) with the IN frame
//! counter (frames the companion returned). Counters are taken relative to the
//! values seen when takeover became active, so history from an earlier session
//! never counts against the current one.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy { drift: u64 },
    /// More than `threshold` frames outstanding.
    Drifted { drift: u64 },
}

impl Liveness {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Liveness::Healthy { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    threshold: u64,
    baseline_out: u64,
    baseline_in: u64,
    last_in: u64,
}

impl LivenessMonitor {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            baseline_out: 0,
            baseline_in: 0,
            last_in: 0,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Start a new session from the current counter values.
    pub fn reset(&mut self, out_counter: u64, in_counter: u64) {
        self.baseline_out = out_counter;
        self.baseline_in = in_counter;
        self.last_in = in_counter;
    }

    /// Frames sent but not yet returned in this session.
    pub fn drift(&self, out_counter: u64, in_counter: u64) -> u64 {
        let sent = out_counter.saturating_sub(self.baseline_out);
        let acked = in_counter.saturating_sub(self.baseline_in);
        sent.saturating_sub(acked)
    }

    pub fn check(&self, out_counter: u64, in_counter: u64) -> Liveness {
        let drift = self.drift(out_counter, in_counter);
        if drift > self.threshold {
            Liveness::Drifted { drift }
        } else {
            Liveness::Healthy { drift }
        }
    }

    /// Record the IN counter; returns whether the companion made progress
    /// since the last call.
    pub fn acknowledge(&mut self, in_counter: u64) -> bool {
        if in_counter > self.last_in {
            self.last_in = in_counter;
            true
        } else {
            false
        }
    }

    pub fn last_acknowledged(&self) -> u64 {
        self.last_in
    }
}
