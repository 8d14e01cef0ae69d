//! Per-channel capture into the OUT region.

use crate::engine::SampleSink;
use crate::shared::BusShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Sink for one synth channel.
///
/// Always records block peaks for metering. While the frame round-trips it
/// also appends the block to the channel's current OUT slot; blocks past the
/// slot capacity are truncated.
pub struct ChannelSink {
    shared: Arc<BusShared>,
    channel: usize,
}

impl ChannelSink {
    pub(crate) fn new(shared: Arc<BusShared>, channel: usize) -> Self {
        Self { shared, channel }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl SampleSink for ChannelSink {
    fn capture(&self, block: &[f32]) {
        let shared = &*self.shared;
        shared.peaks[self.channel].record_block(block);

        if !shared.route_through.load(Ordering::Acquire) {
            return;
        }

        let cursor = &shared.cursors[self.channel];
        let offset = cursor.load(Ordering::Relaxed);
        let written = shared.bus.region().write_out_slot_at(
            self.channel,
            shared.write_index.load(Ordering::Acquire),
            offset,
            block,
        );
        cursor.store(offset + written, Ordering::Relaxed);
    }
}
