//! Centralized error type for the synthbus umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] synthbus_core::BusError),

    #[error("Control: {0}")]
    Control(#[from] synthbus_control::ControlError),

    #[cfg(feature = "companion")]
    #[error("Companion: {0}")]
    Companion(#[from] synthbus_companion::CompanionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn attach_missing() -> Result<()> {
        Err(synthbus_core::BusError::BadMagic)?
    }

    #[test]
    fn test_subsystem_errors_convert() {
        assert!(matches!(attach_missing(), Err(Error::Bus(_))));

        let control: Error = synthbus_control::ControlError::Remote("no banks".into()).into();
        assert!(control.to_string().contains("no banks"));
    }
}
