//! # synthbus - shared-memory audio bus
//!
//! Routes a real-time synth host's audio through a cooperating effects
//! companion process, without ever letting the companion stall synthesis.
//!
//! ## Architecture
//!
//! synthbus is an umbrella crate over:
//! - **synthbus-core** - Region layout, named mutex and signals, takeover
//!   state machine, liveness, latency stamps, level metering
//! - **synthbus-control** - Out-of-band commands (bank lists, panic, reset,
//!   levels) over a local socket or the region's header flags
//! - **synthbus-host** - Host context, per-frame buffer exchange, capture
//!   sinks, monitoring thread
//! - **synthbus-companion** - Attach, takeover requests, frame serving,
//!   bank-list responder
//!
//! ## Quick Start
//!
//! ```ignore
//! use synthbus::prelude::*;
//!
//! // Host process
//! let mut host = HostBus::new(BusConfig::default());
//! host.create()?;
//! host.start_monitor(None)?;
//! let mut port = host.audio_port();
//!
//! // per audio callback
//! port.begin_frame(frames);
//! // ... render, sinks capture per channel ...
//! port.finish_frame(&mut output);
//!
//! // Companion process
//! let mut companion = CompanionBus::attach(&BusConfig::default())?;
//! let mut mix = Mixdown::new(companion.channels());
//! serve(&mut companion, &mut mix, &StopHandle::new(), IDLE_WAIT);
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Host and companion
//! - `host` - Host side
//! - `companion` - Companion side

mod error;
pub use error::{Error, Result};

/// Re-export of synthbus-core for direct access
pub use synthbus_core as core;

/// Re-export of synthbus-control for direct access
pub use synthbus_control as control;

// Core types
pub use synthbus_core::{
    BusConfig, BusError, BusFlags, BusRegion, LatencySnapshot, Liveness, LivenessMonitor,
    RegionLayout, Stage, TakeoverRequest, TakeoverState, PROTOCOL_VERSION, SAMPLES_PER_FRAME,
};

// Control channel
pub use synthbus_control::{
    CommandHandler, ControlChannel, ControlConfig, ControlError, LevelsReport, PipeChannel,
    PipeServer, RegionChannel, Request, Response,
};

// Host side
#[cfg(feature = "host")]
pub use synthbus_host as host;

#[cfg(feature = "host")]
pub use synthbus_host::{
    AudioPort, ChannelCapture, ChannelSink, FrameOutcome, HostBus, OutputBackend, SampleSink,
    SynthCommandHandler, SynthControl,
};

// Companion side
#[cfg(feature = "companion")]
pub use synthbus_companion as companion;

#[cfg(feature = "companion")]
pub use synthbus_companion::{
    serve, BankCommandHandler, BankLists, ChannelFrames, CompanionBus, CompanionError, Effect,
    Mixdown, ServeOutcome, StopHandle, IDLE_WAIT,
};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{BusConfig, ControlConfig, Error, Result, TakeoverState};

    #[cfg(feature = "host")]
    pub use crate::{AudioPort, FrameOutcome, HostBus, SampleSink, SynthControl};

    #[cfg(feature = "companion")]
    pub use crate::{serve, CompanionBus, Effect, Mixdown, StopHandle, IDLE_WAIT};
}
