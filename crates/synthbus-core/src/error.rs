//! Error types for the shared audio bus.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Region magic bytes do not match")]
    BadMagic,

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Region size mismatch: expected {expected} bytes, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Region is owned by running process {owner_pid}")]
    RegionBusy { owner_pid: u32 },

    #[error("Timeout after {duration_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, duration_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Whether a companion must refuse to attach because the layout is foreign.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            BusError::BadMagic | BusError::VersionMismatch { .. } | BusError::SizeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
