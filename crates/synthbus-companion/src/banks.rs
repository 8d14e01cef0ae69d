//! Sound bank lists served to synth hosts over the control channel.

use crate::error::{CompanionError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use synthbus_control::{CommandHandler, Request, Response};

/// Bank list text per application, with an optional fallback.
///
/// Applications are matched case-insensitively, first by the name the host
/// reports and then by the file name of its executable path.
#[derive(Default)]
pub struct BankLists {
    per_app: RwLock<HashMap<String, String>>,
    fallback: RwLock<Option<String>>,
}

impl BankLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fallback(&self, list: impl Into<String>) {
        *self.fallback.write() = Some(list.into());
    }

    pub fn clear_fallback(&self) {
        *self.fallback.write() = None;
    }

    pub fn set_for_app(&self, app: &str, list: impl Into<String>) {
        self.per_app.write().insert(app.to_lowercase(), list.into());
    }

    pub fn remove_app(&self, app: &str) -> bool {
        self.per_app.write().remove(&app.to_lowercase()).is_some()
    }

    /// Load a list file as the fallback.
    pub fn load_fallback(&self, path: &Path) -> Result<()> {
        let list = std::fs::read_to_string(path).map_err(|source| CompanionError::BankList {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded fallback bank list");
        self.set_fallback(list);
        Ok(())
    }

    pub fn lookup(&self, app_name: &str, app_path: &str) -> Option<String> {
        let per_app = self.per_app.read();
        let by_name = (!app_name.is_empty())
            .then(|| per_app.get(&app_name.to_lowercase()))
            .flatten();
        let by_path = || {
            Path::new(app_path)
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| per_app.get(&name.to_lowercase()))
        };

        by_name
            .or_else(by_path)
            .cloned()
            .or_else(|| self.fallback.read().clone())
    }
}

/// Control handler for the companion's socket: answers `LIST_BANKS`.
pub struct BankCommandHandler {
    banks: Arc<BankLists>,
}

impl BankCommandHandler {
    pub fn new(banks: Arc<BankLists>) -> Self {
        Self { banks }
    }
}

impl CommandHandler for BankCommandHandler {
    fn handle(&self, request: &Request) -> Response {
        match request {
            Request::ListBanks {
                app_name,
                app_path,
                pid,
            } => match self.banks.lookup(app_name, app_path) {
                Some(list) => {
                    tracing::debug!(app_name, pid, "Serving bank list");
                    Response::Data(list)
                }
                None => Response::error(format!("no bank list for '{}'", app_name)),
            },
            other => Response::error(format!(
                "{} is handled by the synth host",
                other.command()
            )),
        }
    }
}
