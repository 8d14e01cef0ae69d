//! Diagnostics raised on the audio thread and logged by the monitor.

use crossbeam::queue::ArrayQueue;
use synthbus_core::TakeoverState;

pub(crate) const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// No processed frame within the per-frame timeout.
    Timeout,
    /// Too many frames outstanding.
    Drift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    StateChanged {
        from: TakeoverState,
        to: TakeoverState,
    },
    ForcedRelease {
        reason: ReleaseReason,
        frame: u64,
        drift: u64,
    },
    /// Forced release could not take the lock; retried at the next boundary.
    ReleaseDeferred { frame: u64 },
}

impl BusEvent {
    pub(crate) fn log(&self) {
        match *self {
            BusEvent::StateChanged { from, to } => {
                tracing::info!(%from, %to, "Takeover state changed");
            }
            BusEvent::ForcedRelease {
                reason: ReleaseReason::Timeout,
                frame,
                drift,
            } => {
                tracing::warn!(frame, drift, "Companion missed frame deadline, releasing");
            }
            BusEvent::ForcedRelease {
                reason: ReleaseReason::Drift,
                frame,
                drift,
            } => {
                tracing::warn!(frame, drift, "Companion drifted past threshold, releasing");
            }
            BusEvent::ReleaseDeferred { frame } => {
                tracing::debug!(frame, "Forced release deferred to next frame boundary");
            }
        }
    }
}

/// Bounded, lock-free. Events are dropped when full.
pub(crate) struct EventQueue {
    queue: ArrayQueue<BusEvent>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: ArrayQueue::new(EVENT_QUEUE_CAPACITY),
        }
    }

    #[inline]
    pub(crate) fn push(&self, event: BusEvent) {
        let _ = self.queue.push(event);
    }

    pub(crate) fn pop(&self) -> Option<BusEvent> {
        self.queue.pop()
    }
}
