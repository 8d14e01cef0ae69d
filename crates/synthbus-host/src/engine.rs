//! Capabilities the host needs from its synthesis engine and output backend.

use std::sync::Arc;

/// Receives one rendered block of a single channel.
///
/// Called on the audio thread; implementations must not block or allocate.
pub trait SampleSink: Send + Sync {
    /// `block` is interleaved stereo.
    fn capture(&self, block: &[f32]);
}

/// A synth that can feed per-channel output to registered sinks.
pub trait ChannelCapture {
    fn channel_count(&self) -> usize;

    /// Register a sink invoked once per rendered block of `channel`.
    fn register_sink(&mut self, channel: usize, sink: Arc<dyn SampleSink>);
}

/// Administrative control of the synth, driven by the control channel.
pub trait SynthControl: Send + Sync {
    /// Silence all voices immediately.
    fn silence_all(&self);

    /// Full reset of synth state.
    fn reset(&self);
}

/// Device output backend, described for latency reporting only.
pub trait OutputBackend {
    fn backend_id(&self) -> u32;

    fn output_latency_us(&self) -> u32;

    fn input_latency_us(&self) -> u32 {
        0
    }
}
