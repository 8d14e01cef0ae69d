//! Error types for the companion side.

use synthbus_control::ControlError;
use synthbus_core::BusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Audio bus owned by process {owner_pid} is not active")]
    HostInactive { owner_pid: u32 },

    #[error("Failed to read bank list {path}: {source}")]
    BankList {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompanionError {
    /// Whether the region belongs to an incompatible build and must never be used.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, CompanionError::Bus(e) if e.is_protocol_mismatch())
    }
}

pub type Result<T> = std::result::Result<T, CompanionError>;
