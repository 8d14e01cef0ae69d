//! Host-side housekeeping, off the audio thread.
//!
//! Each poll applies companion takeover requests, logs audio-thread events,
//! answers region panic requests, folds captured peaks into the header and
//! republishes derived latency.

use crate::shared::BusShared;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use synthbus_control::{CommandHandler, RegionCommandSource};
use synthbus_core::{TakeoverEvent, TakeoverRequest};
use tracing::{debug, warn};

/// What a single poll did. Mostly useful to tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub events: usize,
    pub companion_request: Option<TakeoverRequest>,
    pub command_served: bool,
    pub levels_published: bool,
}

pub struct Monitor {
    shared: Arc<BusShared>,
    handler: Option<Arc<dyn CommandHandler>>,
    commands: RegionCommandSource,
    last_seq: u32,
}

impl Monitor {
    pub(crate) fn new(shared: Arc<BusShared>, handler: Option<Arc<dyn CommandHandler>>) -> Self {
        let (_, last_seq) = shared.bus.header().companion_request();
        shared.monitors.fetch_add(1, Ordering::AcqRel);
        Self {
            shared,
            handler,
            commands: RegionCommandSource::new(),
            last_seq,
        }
    }

    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary {
            companion_request: self.apply_companion_request(),
            ..Default::default()
        };

        while let Some(event) = self.shared.events.pop() {
            event.log();
            summary.events += 1;
        }

        if let Some(handler) = &self.handler {
            summary.command_served =
                self.commands.poll(&self.shared.bus, handler.as_ref()).is_some();
        }

        summary.levels_published = self.publish_levels();
        self.shared.bus.publish_derived_latency();
        summary
    }

    fn apply_companion_request(&mut self) -> Option<TakeoverRequest> {
        let bus = &self.shared.bus;
        let (request, seq) = bus.header().companion_request();
        if seq == self.last_seq {
            return None;
        }

        let event = match request {
            TakeoverRequest::Takeover => TakeoverEvent::RequestTakeover,
            TakeoverRequest::Release => TakeoverEvent::RequestRelease,
            TakeoverRequest::None => {
                self.last_seq = seq;
                return None;
            }
        };

        match bus.meta() {
            Ok(guard) => {
                let result = bus.transition(&guard, event);
                drop(guard);
                self.last_seq = seq;
                debug!(?request, seq, ?result, "Applied companion request");
                Some(request)
            }
            Err(e) => {
                // Retried on the next poll; the sequence is not consumed.
                warn!("Companion request deferred: {}", e);
                None
            }
        }
    }

    fn publish_levels(&self) -> bool {
        let shared = &*self.shared;
        let (mut master_l, mut master_r) = (0.0f32, 0.0f32);

        for (channel, meter) in shared.peaks.iter().enumerate() {
            let (l, r) = meter.take();
            master_l = master_l.max(l);
            master_r = master_r.max(r);
            shared.bus.update_channel_levels(channel, l, r);
        }

        shared.publish_master(master_l, master_r)
    }

    /// Run [`poll`](Self::poll) every `poll_interval` on a background thread.
    pub fn spawn(mut self) -> std::io::Result<MonitorHandle> {
        let interval = self.shared.bus.config().poll_interval();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("synthbus-monitor".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.poll();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(MonitorHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shared.monitors.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Stops and joins the monitor thread on drop.
pub struct MonitorHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.halt();
    }
}
