//! Shared-memory audio bus between a synth host and an effects companion.
//!
//! # Primary API
//!
//! - [`BusRegion`]: owned handle set (region, metadata mutex, both signals)
//! - [`SharedRegion`] / [`RegionLayout`]: versioned region and its offsets
//! - [`TakeoverMachine`]: DIRECT / PENDING / ACTIVE / RELEASING negotiation
//! - [`LivenessMonitor`]: frame-counter drift detection
//! - [`LatencyClock`] / [`LatencySnapshot`]: pipeline timestamps
//!
//! The host creates every named object; a companion only opens them and
//! refuses any region whose magic, version or size it does not recognise.

pub mod error;
pub use error::{BusError, Result};

pub mod config;
pub use config::BusConfig;

pub mod layout;
pub use layout::{RegionLayout, MAGIC, PROTOCOL_VERSION, SAMPLES_PER_FRAME};

mod region;
pub use region::{ExistingRegion, SharedRegion};

mod header;
pub use header::{BusFlags, ChannelInfo, Header};

pub mod sync;
pub use sync::{MutexGuard, NamedMutex, Signal};

pub mod takeover;
pub use takeover::{TakeoverEvent, TakeoverMachine, TakeoverRequest, TakeoverState, TransitionResult};

pub mod liveness;
pub use liveness::{Liveness, LivenessMonitor};

pub mod latency;
pub use latency::{ticks_to_micros, LatencyClock, LatencySnapshot, Stage};

pub mod metering;
pub use metering::{block_peaks, smooth_peak, PeakMeter, LEVEL_DECAY};

mod bus;
pub use bus::{BusRegion, Role};
