//! The host's owned bus context.

use crate::engine::{ChannelCapture, OutputBackend, SampleSink};
use crate::handler::LevelSource;
use crate::monitor::{Monitor, MonitorHandle};
use crate::port::AudioPort;
use crate::shared::BusShared;
use crate::sink::ChannelSink;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use synthbus_control::{CommandHandler, LevelsReport};
use synthbus_core::{BusConfig, BusFlags, BusRegion, Result, TakeoverState};
use tracing::{info, warn};

/// Owns the region, the named objects and the monitoring thread.
///
/// A failed [`create`](Self::create) leaves the context disconnected: every
/// metadata call becomes a no-op returning `false` and audio ports route
/// directly, so synthesis never depends on the bus.
pub struct HostBus {
    config: BusConfig,
    shared: Option<Arc<BusShared>>,
    monitor: Option<MonitorHandle>,
}

impl HostBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            shared: None,
            monitor: None,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Create and initialise the region. No-op when already connected.
    pub fn create(&mut self) -> Result<()> {
        if self.shared.is_some() {
            return Ok(());
        }
        match BusRegion::create(&self.config) {
            Ok(bus) => {
                self.shared = Some(Arc::new(BusShared::new(bus)));
                Ok(())
            }
            Err(e) => {
                warn!("Audio bus unavailable, synthesis stays direct: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the monitor and mark the region inactive. Idempotent; runs on drop.
    ///
    /// Ports and sinks still holding the region see it inactive and route
    /// directly until they are dropped.
    pub fn destroy(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(shared) = self.shared.take() {
            shared.route_through.store(false, Ordering::Release);
            shared.bus.shutdown();
            info!("Host bus destroyed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_some()
    }

    pub fn bus(&self) -> Option<&BusRegion> {
        self.shared.as_deref().map(|s| &s.bus)
    }

    pub fn state(&self) -> TakeoverState {
        self.bus()
            .map(|b| b.takeover_state())
            .unwrap_or(TakeoverState::Direct)
    }

    pub fn flags(&self) -> BusFlags {
        self.bus().map(|b| b.flags()).unwrap_or_else(BusFlags::empty)
    }

    /// The audio thread's port. Only one live port may exchange frames; any
    /// further port (or one taken while disconnected) routes directly.
    pub fn audio_port(&self) -> AudioPort {
        match &self.shared {
            Some(shared) if !shared.port_claimed.swap(true, Ordering::AcqRel) => {
                AudioPort::new(Some(Arc::clone(shared)), &self.config)
            }
            Some(_) => {
                warn!("Audio port already claimed, new port routes directly");
                AudioPort::new(None, &self.config)
            }
            None => AudioPort::new(None, &self.config),
        }
    }

    pub fn channel_sink(&self, channel: usize) -> Option<Arc<ChannelSink>> {
        let shared = self.shared.as_ref()?;
        if channel >= shared.channels() {
            return None;
        }
        Some(Arc::new(ChannelSink::new(Arc::clone(shared), channel)))
    }

    /// Register a sink on every channel both sides know about. Returns how many.
    pub fn attach_capture(&self, capture: &mut dyn ChannelCapture) -> usize {
        let channels = capture.channel_count();
        let mut attached = 0;
        for channel in 0..channels {
            let Some(sink) = self.channel_sink(channel) else {
                break;
            };
            capture.register_sink(channel, sink as Arc<dyn SampleSink>);
            attached += 1;
        }
        if attached < channels {
            warn!(
                attached,
                requested = channels,
                "Synth has more channels than the audio bus"
            );
        }
        attached
    }

    /// Start the monitoring thread. `handler` answers panic requests raised
    /// through the region flags. No-op when disconnected or already running.
    pub fn start_monitor(&mut self, handler: Option<Arc<dyn CommandHandler>>) -> Result<bool> {
        let Some(shared) = &self.shared else {
            return Ok(false);
        };
        if self.monitor.is_some() {
            return Ok(false);
        }
        self.monitor = Some(Monitor::new(Arc::clone(shared), handler).spawn()?);
        Ok(true)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_running())
    }

    /// A monitor to drive by hand instead of on its own thread.
    pub fn monitor(&self) -> Option<Monitor> {
        self.shared
            .as_ref()
            .map(|shared| Monitor::new(Arc::clone(shared), None))
    }

    /// `GET_LEVELS` source for a [`SynthCommandHandler`](crate::SynthCommandHandler).
    pub fn level_source(&self) -> Option<Arc<dyn LevelSource>> {
        self.shared
            .as_ref()
            .map(|shared| Arc::clone(shared) as Arc<dyn LevelSource>)
    }

    // ---------------------------------------------------------------------
    // Metadata passthroughs. All return false when disconnected or contended.
    // ---------------------------------------------------------------------

    /// Report master levels. While a monitor exists it folds the report into
    /// its next publish, so the header is smoothed once per poll; otherwise
    /// the report is published now.
    pub fn update_levels(&self, peak_l: f32, peak_r: f32, total_voices: u32, cpu_load: f32) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        shared.report_levels(peak_l, peak_r, total_voices, cpu_load);
        if shared.monitors.load(Ordering::Acquire) > 0 {
            return true;
        }
        shared.publish_master(0.0, 0.0)
    }

    pub fn update_channel_levels(&self, channel: usize, peak_l: f32, peak_r: f32) -> bool {
        self.bus()
            .is_some_and(|b| b.update_channel_levels(channel, peak_l, peak_r))
    }

    pub fn update_channel_voices(&self, channel: usize, voices: u32) -> bool {
        self.bus()
            .is_some_and(|b| b.update_channel_voices(channel, voices))
    }

    pub fn update_all_channel_voices(&self, voices: &[u32]) -> bool {
        self.bus().is_some_and(|b| b.update_all_channel_voices(voices))
    }

    pub fn set_sample_rate(&self, sample_rate: u32) -> bool {
        match self.bus() {
            Some(bus) => match bus.set_sample_rate(sample_rate) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Sample rate not published: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    pub fn publish_output_info(&self, backend: &dyn OutputBackend) -> bool {
        self.bus().is_some_and(|b| {
            b.update_latency_info(
                backend.output_latency_us(),
                backend.input_latency_us(),
                backend.backend_id(),
            )
        })
    }

    pub fn panic_requested(&self) -> bool {
        self.bus().is_some_and(|b| b.panic_requested())
    }

    pub fn acknowledge_panic(&self) -> bool {
        self.bus().is_some_and(|b| b.acknowledge_panic())
    }
}

impl Drop for HostBus {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl LevelSource for BusShared {
    fn levels(&self) -> LevelsReport {
        self.bus.levels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synthbus_core::{BusError, TakeoverRequest};

    fn test_config(dir: &tempfile::TempDir) -> BusConfig {
        BusConfig {
            shm_dir: Some(dir.path().to_path_buf()),
            channels: 4,
            frame_capacity: 16,
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct FakeSynth {
        channels: usize,
        sinks: Vec<(usize, Arc<dyn SampleSink>)>,
    }

    impl ChannelCapture for FakeSynth {
        fn channel_count(&self) -> usize {
            self.channels
        }

        fn register_sink(&mut self, channel: usize, sink: Arc<dyn SampleSink>) {
            self.sinks.push((channel, sink));
        }
    }

    struct FakeBackend;

    impl OutputBackend for FakeBackend {
        fn backend_id(&self) -> u32 {
            2
        }

        fn output_latency_us(&self) -> u32 {
            5333
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HostBus::new(test_config(&dir));
        assert!(!host.is_connected());

        host.create().unwrap();
        host.create().unwrap();
        assert!(host.is_connected());
        assert!(host.flags().contains(BusFlags::ACTIVE));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let mut host = HostBus::new(config.clone());
        host.create().unwrap();
        let reader = BusRegion::open(&config).unwrap();

        host.destroy();
        host.destroy();
        assert!(!host.is_connected());
        assert!(!reader.is_active());
    }

    #[test]
    fn test_failed_create_is_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.channels = 0;
        let mut host = HostBus::new(config);

        assert!(matches!(host.create(), Err(BusError::InvalidConfig(_))));
        assert!(!host.is_connected());
        assert!(!host.update_levels(0.5, 0.5, 1, 0.0));
        assert!(!host.set_sample_rate(44100));
        assert_eq!(host.state(), TakeoverState::Direct);
        assert!(!host.audio_port().is_connected());
        assert!(!host.start_monitor(None).unwrap());
    }

    #[test]
    fn test_master_levels_smoothed_once_per_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HostBus::new(test_config(&dir));
        host.create().unwrap();

        // No monitor: published immediately.
        assert!(host.update_levels(0.5, 0.25, 3, 0.1));
        let header = host.bus().unwrap().header();
        assert_eq!(header.master_peaks(), (0.5, 0.25));
        assert_eq!(header.total_voices(), 3);

        let mut monitor = host.monitor().unwrap();
        assert!(host.update_levels(0.0, 0.0, 4, 0.1));
        assert!(host.update_levels(0.0, 0.0, 5, 0.1));
        // Held for the monitor.
        assert_eq!(header.master_peaks(), (0.5, 0.25));

        assert!(monitor.poll().levels_published);
        let (l, r) = header.master_peaks();
        assert!((l - 0.5 * synthbus_core::LEVEL_DECAY).abs() < 1e-6);
        assert!((r - 0.25 * synthbus_core::LEVEL_DECAY).abs() < 1e-6);
        assert_eq!(header.total_voices(), 5);

        drop(monitor);
        assert!(host.update_levels(0.75, 0.0, 5, 0.1));
        assert_eq!(header.master_peaks().0, 0.75);
    }

    #[test]
    fn test_single_port_claim() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HostBus::new(test_config(&dir));
        host.create().unwrap();

        let first = host.audio_port();
        let second = host.audio_port();
        assert!(first.is_connected());
        assert!(!second.is_connected());

        drop(first);
        assert!(host.audio_port().is_connected());
    }

    #[test]
    fn test_attach_capture_limits_to_bus_channels() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HostBus::new(test_config(&dir));
        host.create().unwrap();

        let mut synth = FakeSynth {
            channels: 6,
            ..Default::default()
        };
        assert_eq!(host.attach_capture(&mut synth), 4);
        let channels: Vec<usize> = synth.sinks.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![0, 1, 2, 3]);
        assert!(host.channel_sink(4).is_none());
    }

    #[test]
    fn test_metadata_passthroughs() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HostBus::new(test_config(&dir));
        host.create().unwrap();

        assert!(host.update_all_channel_voices(&[1, 2, 3]));
        assert!(host.set_sample_rate(44100));
        assert!(host.publish_output_info(&FakeBackend));

        let header = host.bus().unwrap().header();
        assert_eq!(header.total_voices(), 6);
        assert_eq!(header.sample_rate(), 44100);
        assert_eq!(header.latency_info(), (5333, 0, 2));
    }

    #[test]
    fn test_monitor_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let mut host = HostBus::new(config.clone());
        host.create().unwrap();

        assert!(host.start_monitor(None).unwrap());
        assert!(!host.start_monitor(None).unwrap());
        assert!(host.is_monitoring());

        let companion = BusRegion::open(&config).unwrap();
        companion
            .header()
            .post_companion_request(TakeoverRequest::Takeover);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while host.state() != TakeoverState::Pending {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        host.destroy();
        assert!(!host.is_monitoring());
    }
}
