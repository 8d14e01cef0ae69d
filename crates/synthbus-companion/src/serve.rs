//! The companion's serving loop.

use crate::bus::{CompanionBus, ServeOutcome};
use crate::effect::Effect;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synthbus_core::TakeoverState;
use tracing::{info, warn};

/// Default wait for a frame before re-checking the host and the stop flag.
pub const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Minimum gap between takeover requests while the host routes directly.
pub const RENEGOTIATE_BACKOFF: Duration = Duration::from_millis(500);

/// Cloneable stop flag for [`serve`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    pub served: u64,
    pub idle: u64,
    /// Takeover requests posted after the first one.
    pub renegotiated: u64,
    pub host_gone: bool,
}

/// Take over the host's audio and serve frames until stopped or the host goes
/// away. Releases the takeover on the way out if the host is still running.
///
/// When the host has fallen back to direct output (a forced release after a
/// missed frame, or a takeover that never landed), the request is posted
/// again at most once per [`RENEGOTIATE_BACKOFF`].
pub fn serve(
    companion: &mut CompanionBus,
    effect: &mut dyn Effect,
    stop: &StopHandle,
    idle_wait: Duration,
) -> ServeStats {
    let mut stats = ServeStats::default();

    if let Err(e) = companion.set_effects_loaded(true) {
        warn!("Could not advertise loaded effects: {}", e);
    }
    companion.request_takeover();
    let mut last_request = Instant::now();

    while !stop.is_stopped() {
        match companion.serve_frame(effect, idle_wait) {
            ServeOutcome::Served { .. } => stats.served += 1,
            ServeOutcome::Idle => {
                stats.idle += 1;
                if companion.state() == TakeoverState::Direct
                    && last_request.elapsed() >= RENEGOTIATE_BACKOFF
                {
                    info!("Host routes directly, renegotiating takeover");
                    companion.request_takeover();
                    last_request = Instant::now();
                    stats.renegotiated += 1;
                }
            }
            ServeOutcome::HostGone => {
                stats.host_gone = true;
                break;
            }
        }
    }

    if companion.host_alive() {
        companion.request_release();
        if let Err(e) = companion.set_effects_loaded(false) {
            warn!("Could not clear loaded effects: {}", e);
        }
    }

    info!(
        served = stats.served,
        idle = stats.idle,
        host_gone = stats.host_gone,
        "Serving stopped"
    );
    stats
}
