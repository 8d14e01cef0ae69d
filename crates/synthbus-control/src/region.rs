//! Flag transport over the shared region header.
//!
//! Only `PANIC` travels this way: the requester sets PANIC_REQUEST, the host
//! monitor notices it, silences the synth and answers with PANIC_ACK.

use crate::channel::{CommandHandler, ControlChannel};
use crate::error::{ControlError, Result};
use crate::wire::{Request, Response};
use std::time::{Duration, Instant};
use synthbus_core::BusRegion;

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Requesting side, usually held by the companion.
pub struct RegionChannel<'a> {
    bus: &'a BusRegion,
}

impl<'a> RegionChannel<'a> {
    pub fn new(bus: &'a BusRegion) -> Self {
        Self { bus }
    }
}

impl ControlChannel for RegionChannel<'_> {
    fn send(&mut self, request: &Request, timeout: Duration) -> Result<Response> {
        if *request != Request::Panic {
            return Err(ControlError::Unsupported {
                command: request.command(),
                transport: self.transport(),
            });
        }

        self.bus.request_panic()?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.bus.panic_acknowledged() {
                self.bus.clear_panic_ack()?;
                return Ok(Response::ok());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ControlError::Timeout {
                    operation: request.command().to_string(),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(ACK_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn transport(&self) -> &'static str {
        "region"
    }
}

/// Answering side, polled by the host monitor.
///
/// The handler runs once per request; an acknowledgement that cannot take
/// the metadata lock is retried on later polls without handling again.
#[derive(Debug, Default)]
pub struct RegionCommandSource {
    unacknowledged: bool,
}

impl RegionCommandSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handled request still waits for its acknowledgement.
    pub fn ack_pending(&self) -> bool {
        self.unacknowledged
    }

    /// Handle a pending panic request, if any. Blocks at most the bus lock
    /// timeout. Returns the handler's response when it ran on this poll.
    pub fn poll(&mut self, bus: &BusRegion, handler: &dyn CommandHandler) -> Option<Response> {
        let response = if self.unacknowledged {
            None
        } else {
            if !bus.panic_requested() {
                return None;
            }
            Some(handler.handle(&Request::Panic))
        };

        match bus.acknowledge_panic_bounded() {
            Ok(()) => self.unacknowledged = false,
            Err(e) => {
                tracing::debug!("Panic acknowledgement deferred: {}", e);
                self.unacknowledged = true;
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use synthbus_core::BusConfig;

    fn test_config(dir: &tempfile::TempDir) -> BusConfig {
        BusConfig {
            shm_dir: Some(dir.path().to_path_buf()),
            channels: 2,
            frame_capacity: 32,
            ..Default::default()
        }
    }

    #[test]
    fn test_panic_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let host = Arc::new(BusRegion::create(&config).unwrap());
        let companion = BusRegion::open(&config).unwrap();

        let panics = Arc::new(AtomicUsize::new(0));
        let poller = {
            let host = Arc::clone(&host);
            let panics = Arc::clone(&panics);
            std::thread::spawn(move || {
                let handler = move |_: &Request| {
                    panics.fetch_add(1, Ordering::SeqCst);
                    Response::ok()
                };
                let mut source = RegionCommandSource::new();
                let deadline = Instant::now() + Duration::from_secs(2);
                while Instant::now() < deadline {
                    if source.poll(&host, &handler).is_some() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let mut channel = RegionChannel::new(&companion);
        let response = channel
            .send(&Request::Panic, Duration::from_secs(1))
            .unwrap();
        poller.join().unwrap();

        assert_eq!(response, Response::ok());
        assert_eq!(panics.load(Ordering::SeqCst), 1);
        assert!(!companion.panic_acknowledged());
    }

    #[test]
    fn test_unacknowledged_panic_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let _host = BusRegion::create(&config).unwrap();
        let companion = BusRegion::open(&config).unwrap();

        let mut channel = RegionChannel::new(&companion);
        let err = channel
            .send(&Request::Panic, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ControlError::Timeout { duration_ms: 30, .. }));
    }

    #[test]
    fn test_other_commands_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let host = BusRegion::create(&config).unwrap();

        let mut channel = RegionChannel::new(&host);
        assert!(matches!(
            channel.send(&Request::Reset, Duration::from_millis(10)),
            Err(ControlError::Unsupported { command: "RESET", transport: "region" })
        ));
    }

    #[test]
    fn test_poll_without_request_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let host = BusRegion::create(&config).unwrap();
        let handler = |_: &Request| -> Response { panic!("handler must not run") };
        assert!(RegionCommandSource::new().poll(&host, &handler).is_none());
    }

    #[test]
    fn test_deferred_ack_does_not_repeat_handler() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let host = BusRegion::create(&config).unwrap();
        let companion = Arc::new(BusRegion::open(&config).unwrap());

        // The handler leaves the metadata lock held past the ack timeout.
        let panics = Arc::new(AtomicUsize::new(0));
        let handler = {
            let companion = Arc::clone(&companion);
            let panics = Arc::clone(&panics);
            move |_: &Request| {
                panics.fetch_add(1, Ordering::SeqCst);
                let (locked_tx, locked_rx) = std::sync::mpsc::channel();
                let companion = Arc::clone(&companion);
                std::thread::spawn(move || {
                    let _held = companion.meta().unwrap();
                    locked_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                });
                locked_rx.recv().unwrap();
                Response::ok()
            }
        };

        let mut source = RegionCommandSource::new();
        companion.request_panic().unwrap();

        assert_eq!(source.poll(&host, &handler), Some(Response::ok()));
        assert!(source.ack_pending());
        assert!(source.poll(&host, &handler).is_none());
        assert_eq!(panics.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(150));
        assert!(source.poll(&host, &handler).is_none());
        assert!(!source.ack_pending());
        assert!(companion.panic_acknowledged());
        assert_eq!(panics.load(Ordering::SeqCst), 1);
    }
}
