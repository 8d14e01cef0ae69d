//! Host side of synthbus.
//!
//! The synth host owns the shared region through a [`HostBus`]. Its audio
//! callback drives an [`AudioPort`] once per frame, per-channel
//! [`ChannelSink`]s capture rendered blocks into the OUT buffers, and a
//! background [`Monitor`] handles everything that may block or log.
//!
//! ```ignore
//! let mut host = HostBus::new(BusConfig::default());
//! host.create()?;
//! host.attach_capture(&mut synth);
//! host.start_monitor(Some(Arc::new(SynthCommandHandler::new(synth_control))))?;
//!
//! let mut port = host.audio_port();
//! // audio callback:
//! port.begin_frame(frames);
//! synth.render(&mut output);
//! port.finish_frame(&mut output);
//! ```

mod context;
mod engine;
mod event;
mod handler;
mod monitor;
mod port;
mod shared;
mod sink;

pub use context::HostBus;
pub use engine::{ChannelCapture, OutputBackend, SampleSink, SynthControl};
pub use event::{BusEvent, ReleaseReason};
pub use handler::{LevelSource, SynthCommandHandler};
pub use monitor::{Monitor, MonitorHandle, PollSummary};
pub use port::{AudioPort, FrameOutcome};
pub use sink::ChannelSink;
