//! Region identity checks and takeover negotiation across processes' views.

mod helpers;

use helpers::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use synthbus::prelude::*;
use synthbus::{BusError, BusRegion, CompanionError, TakeoverRequest, PROTOCOL_VERSION};
use tempfile::tempdir;

fn overwrite_region(config: &BusConfig, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(config.region_path())
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

#[test]
fn test_version_mismatch_offers_no_channels() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let _host = test_host(&config);
    assert_eq!(
        CompanionBus::available_channels(&config),
        TEST_CHANNELS as usize
    );

    overwrite_region(&config, 4, &(PROTOCOL_VERSION + 1).to_le_bytes());

    assert_eq!(CompanionBus::available_channels(&config), 0);
    let err = CompanionBus::attach(&config).err().unwrap();
    assert!(err.is_protocol_mismatch());
    assert!(matches!(
        err,
        CompanionError::Bus(BusError::VersionMismatch { found, .. }) if found == PROTOCOL_VERSION + 1
    ));
}

#[test]
fn test_bad_magic_refused() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let _host = test_host(&config);

    overwrite_region(&config, 0, b"XXXX");
    let err = CompanionBus::attach(&config).err().unwrap();
    assert!(matches!(err, CompanionError::Bus(BusError::BadMagic)));
}

#[test]
fn test_second_host_refused_while_first_is_live() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let first = test_host(&config);

    // Pretend the parent process owns the live region.
    #[cfg(unix)]
    {
        let parent = std::os::unix::process::parent_id();
        overwrite_region(&config, 8, &parent.to_le_bytes());
        let mut second = synthbus::HostBus::new(config.clone());
        assert!(matches!(
            second.create(),
            Err(BusError::RegionBusy { owner_pid }) if owner_pid == parent
        ));
        assert!(!second.is_connected());
    }
    drop(first);
}

#[test]
fn test_reconnect_during_release() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let host = test_host(&config);
    let mut monitor = host.monitor().unwrap();
    let mut port = host.audio_port();
    let companion = CompanionBus::attach(&config).unwrap();

    companion.request_takeover();
    monitor.poll();
    assert_eq!(port.begin_frame(8), TakeoverState::Active);

    companion.request_release();
    monitor.poll();
    assert_eq!(host.state(), TakeoverState::Releasing);

    // Reconnect while the release has not reached a boundary yet.
    companion.request_takeover();
    monitor.poll();
    let bus: &BusRegion = host.bus().unwrap();
    assert_eq!(bus.header().queued_request(), TakeoverRequest::Takeover);
    assert_eq!(host.state(), TakeoverState::Releasing);

    assert_eq!(port.begin_frame(8), TakeoverState::Pending);
    assert_eq!(bus.header().queued_request(), TakeoverRequest::None);
    assert_eq!(port.begin_frame(8), TakeoverState::Active);
}

#[test]
fn test_release_overrides_queued_reconnect() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let host = test_host(&config);
    let mut port = host.audio_port();
    let bus = host.bus().unwrap();

    activate(&host, &mut port, 8);
    bus.request_release().unwrap();
    bus.request_takeover().unwrap();
    bus.request_release().unwrap();

    assert_eq!(port.begin_frame(8), TakeoverState::Direct);
    assert_eq!(port.begin_frame(8), TakeoverState::Direct);
}
