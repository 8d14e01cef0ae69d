//! Companion side of synthbus.
//!
//! A companion process attaches to a running host's region, asks the host to
//! route its audio through it, and then answers every frame the host
//! publishes by mixing the captured channels through an [`Effect`]. It also
//! serves sound bank lists to hosts over the control socket.
//!
//! ```ignore
//! let mut companion = CompanionBus::attach(&BusConfig::default())?;
//! let mut mix = Mixdown::new(companion.channels());
//! serve(&mut companion, &mut mix, &StopHandle::new(), IDLE_WAIT);
//! ```

pub mod error;
pub use error::{CompanionError, Result};

mod banks;
pub use banks::{BankCommandHandler, BankLists};

mod bus;
pub use bus::{CompanionBus, ServeOutcome};

mod effect;
pub use effect::{ChannelFrames, Effect, Mixdown};

mod serve;
pub use serve::{serve, ServeStats, StopHandle, IDLE_WAIT, RENEGOTIATE_BACKOFF};
