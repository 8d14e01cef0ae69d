//! Pipe-delimited text records.
//!
//! Request: `COMMAND|param1|param2|...`. Response: the payload itself, or
//! `ERROR|<message>`. One request and one response per connection; on the
//! socket transport each record ends with a NUL byte.

use crate::error::{ControlError, Result};

pub const FIELD_SEPARATOR: char = '|';
pub const ERROR_PREFIX: &str = "ERROR|";

pub const CMD_LIST_BANKS: &str = "LIST_BANKS";
pub const CMD_PANIC: &str = "PANIC";
pub const CMD_RESET: &str = "RESET";
pub const CMD_GET_LEVELS: &str = "GET_LEVELS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for the sound bank list to use for one client application.
    ListBanks {
        app_name: String,
        app_path: String,
        pid: u32,
    },
    /// Silence all voices.
    Panic,
    /// Full synth reset.
    Reset,
    /// Master levels and voice count.
    GetLevels,
}

impl Request {
    pub fn command(&self) -> &'static str {
        match self {
            Request::ListBanks { .. } => CMD_LIST_BANKS,
            Request::Panic => CMD_PANIC,
            Request::Reset => CMD_RESET,
            Request::GetLevels => CMD_GET_LEVELS,
        }
    }

    pub fn encode(&self) -> Result<String> {
        match self {
            Request::ListBanks {
                app_name,
                app_path,
                pid,
            } => {
                check_field(app_name)?;
                check_field(app_path)?;
                Ok(format!(
                    "{}|{}|{}|{}",
                    CMD_LIST_BANKS, app_name, app_path, pid
                ))
            }
            other => Ok(other.command().to_string()),
        }
    }

    pub fn parse(record: &str) -> Result<Self> {
        let record = record.trim_end_matches(['\r', '\n', '\0']);
        let mut fields = record.split(FIELD_SEPARATOR);
        let command = fields.next().unwrap_or_default();

        match command {
            CMD_LIST_BANKS => {
                let app_name = fields.next().unwrap_or_default().to_string();
                let app_path = fields.next().unwrap_or_default().to_string();
                let pid = match fields.next() {
                    Some(raw) if !raw.is_empty() => raw.parse::<u32>().map_err(|_| {
                        ControlError::Protocol(format!("invalid pid '{}'", raw))
                    })?,
                    _ => 0,
                };
                Ok(Request::ListBanks {
                    app_name,
                    app_path,
                    pid,
                })
            }
            CMD_PANIC => Ok(Request::Panic),
            CMD_RESET => Ok(Request::Reset),
            CMD_GET_LEVELS => Ok(Request::GetLevels),
            "" => Err(ControlError::Protocol("empty request".to_string())),
            unknown => Err(ControlError::Protocol(format!(
                "unknown command '{}'",
                unknown
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Data(String),
    Error(String),
}

impl Response {
    pub fn ok() -> Self {
        Response::Data("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn encode(&self) -> String {
        match self {
            Response::Data(data) => data.clone(),
            Response::Error(message) => format!("{}{}", ERROR_PREFIX, message),
        }
    }

    /// An empty record is a protocol error, not an empty payload.
    pub fn parse(record: &str) -> Result<Self> {
        if record.is_empty() {
            return Err(ControlError::Protocol("empty response".to_string()));
        }
        match record.strip_prefix(ERROR_PREFIX) {
            Some(message) => Ok(Response::Error(message.to_string())),
            None => Ok(Response::Data(record.to_string())),
        }
    }

    pub fn into_result(self) -> Result<String> {
        match self {
            Response::Data(data) => Ok(data),
            Response::Error(message) => Err(ControlError::Remote(message)),
        }
    }
}

/// `GET_LEVELS` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelsReport {
    pub master_l: f32,
    pub master_r: f32,
    pub total_voices: u32,
}

impl LevelsReport {
    pub fn encode(&self) -> String {
        format!(
            "{:.4}|{:.4}|{}",
            self.master_l, self.master_r, self.total_voices
        )
    }

    pub fn parse(payload: &str) -> Result<Self> {
        let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        let [l, r, voices] = fields.as_slice() else {
            return Err(ControlError::Protocol(format!(
                "expected 3 level fields, got {}",
                fields.len()
            )));
        };
        let bad = |what: &str| ControlError::Protocol(format!("invalid {} in '{}'", what, payload));
        Ok(Self {
            master_l: l.parse().map_err(|_| bad("left level"))?,
            master_r: r.parse().map_err(|_| bad("right level"))?,
            total_voices: voices.parse().map_err(|_| bad("voice count"))?,
        })
    }
}

fn check_field(value: &str) -> Result<()> {
    if value.contains(FIELD_SEPARATOR) {
        return Err(ControlError::Protocol(format!(
            "field '{}' contains the separator",
            value
        )));
    }
    Ok(())
}
