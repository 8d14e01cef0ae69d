//! Error types for the control channel.

use synthbus_core::BusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// The peer answered with an `ERROR|...` record.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command {command} is not supported over the {transport} transport")]
    Unsupported {
        command: &'static str,
        transport: &'static str,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, ControlError>;
