//! Control channel configuration.

use crate::wire::Request;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOCKET_NAME: &str = "synthbus_control";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Unix socket path, or named pipe path on Windows.
    pub socket_path: PathBuf,
    /// Bank list requests may read files on the answering side.
    pub list_timeout_ms: u64,
    /// PANIC, RESET and GET_LEVELS.
    pub command_timeout_ms: u64,
    /// Longest accepted request or response record.
    pub max_response_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            list_timeout_ms: 1000,
            command_timeout_ms: 500,
            max_response_bytes: 64 * 1024,
        }
    }
}

impl ControlConfig {
    /// How long a client waits for the answer to `request`.
    pub fn timeout_for(&self, request: &Request) -> Duration {
        match request {
            Request::ListBanks { .. } => Duration::from_millis(self.list_timeout_ms),
            _ => Duration::from_millis(self.command_timeout_ms),
        }
    }
}

#[cfg(unix)]
fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("{}.sock", DEFAULT_SOCKET_NAME))
}

#[cfg(windows)]
fn default_socket_path() -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{}", DEFAULT_SOCKET_NAME))
}
