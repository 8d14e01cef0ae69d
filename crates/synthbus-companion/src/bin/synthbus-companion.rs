//! Companion process. Waits for a synth host, takes over its audio and
//! serves bank lists on the control socket.
//!
//! Usage: `synthbus-companion [bank-list-file]`

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use synthbus_companion::{
    serve, BankCommandHandler, BankLists, CompanionBus, Mixdown, Result, StopHandle, IDLE_WAIT,
};
use synthbus_control::{ControlConfig, PipeServer};
use synthbus_core::BusConfig;
use tracing_subscriber::EnvFilter;

const ATTACH_RETRY: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let banks = Arc::new(BankLists::new());
    if let Some(path) = env::args().nth(1) {
        banks.load_fallback(&PathBuf::from(path))?;
    }

    let control = ControlConfig::default();
    let _server = PipeServer::spawn(&control, Arc::new(BankCommandHandler::new(banks)))?;
    tracing::info!(socket = %control.socket_path.display(), "Serving bank lists");

    let config = BusConfig::default();
    let stop = StopHandle::new();
    loop {
        let mut companion = match CompanionBus::attach(&config) {
            Ok(companion) => companion,
            Err(e) if e.is_protocol_mismatch() => return Err(e),
            Err(e) => {
                tracing::debug!("Waiting for host: {}", e);
                std::thread::sleep(ATTACH_RETRY);
                continue;
            }
        };

        let mut mix = Mixdown::new(companion.channels());
        let stats = serve(&mut companion, &mut mix, &stop, IDLE_WAIT);
        if !stats.host_gone {
            return Ok(());
        }
        tracing::info!("Host went away, waiting for the next one");
    }
}
