//! Out-of-band control channel for synthbus.
//!
//! Asynchronous administrative requests (bank lists, panic, reset, levels)
//! travel over a [`ControlChannel`]. Two transports implement it:
//!
//! - [`PipeChannel`] / [`PipeServer`]: Unix socket or Windows named pipe
//! - [`RegionChannel`] / [`RegionCommandSource`]: flags in the shared region
//!   header (panic only)
//!
//! Nothing here may be used from the audio thread.

pub mod error;
pub use error::{ControlError, Result};

pub mod config;
pub use config::ControlConfig;

pub mod wire;
pub use wire::{LevelsReport, Request, Response};

mod channel;
pub use channel::{CommandHandler, ControlChannel};

mod pipe;
pub use pipe::{PipeChannel, PipeServer};

mod region;
pub use region::{RegionChannel, RegionCommandSource};
