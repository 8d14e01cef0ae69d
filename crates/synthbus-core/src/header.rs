//! Typed view over the region header.
//!
//! Every field is accessed atomically. Fields guarded by the metadata mutex
//! take a [`MutexGuard`] as proof of lock; single-writer timestamps, buffer
//! indices and frame counters do not.

use crate::latency::Stage;
use crate::layout::{field, RegionLayout};
use crate::region::NamedMapping;
use crate::sync::MutexGuard;
use crate::takeover::{TakeoverRequest, TakeoverState};
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

bitflags! {
    /// Status bits in the header `flags` word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BusFlags: u32 {
        /// The host is running and the region is live.
        const ACTIVE = 0x0001;
        /// The companion asks the host to silence all voices.
        const PANIC_REQUEST = 0x0002;
        /// The host handled the last panic request.
        const PANIC_ACK = 0x0004;
        /// Audio round-trips through the companion.
        const AUDIO_ENABLED = 0x0008;
        /// The companion has an effect chain loaded.
        const EFFECTS_LOADED = 0x0010;
    }
}

/// Per-channel metering record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelInfo {
    pub peak_l: f32,
    pub peak_r: f32,
    pub voices: u32,
}

#[derive(Clone, Copy)]
pub struct Header<'a> {
    map: &'a NamedMapping,
    layout: &'a RegionLayout,
}

impl<'a> Header<'a> {
    pub(crate) fn new(map: &'a NamedMapping, layout: &'a RegionLayout) -> Self {
        Self { map, layout }
    }

    #[inline]
    fn u32_at(&self, offset: usize) -> &'a AtomicU32 {
        self.map.atomic_u32(offset)
    }

    #[inline]
    fn u64_at(&self, offset: usize) -> &'a AtomicU64 {
        self.map.atomic_u64(offset)
    }

    #[inline]
    fn f32_at(&self, offset: usize) -> f32 {
        f32::from_bits(self.u32_at(offset).load(Ordering::Relaxed))
    }

    #[inline]
    fn store_f32(&self, offset: usize, value: f32) {
        self.u32_at(offset).store(value.to_bits(), Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // Identity and format
    // ---------------------------------------------------------------------

    pub(crate) fn init_identity(
        &self,
        owner_pid: u32,
        sample_rate: u32,
        frame_capacity: u32,
        channels: u32,
    ) {
        self.u32_at(field::VERSION)
            .store(crate::layout::PROTOCOL_VERSION, Ordering::Relaxed);
        self.u32_at(field::OWNER_PID).store(owner_pid, Ordering::Relaxed);
        self.u32_at(field::SAMPLE_RATE)
            .store(sample_rate, Ordering::Relaxed);
        self.u32_at(field::FRAME_CAPACITY)
            .store(frame_capacity, Ordering::Relaxed);
        self.u32_at(field::CHANNEL_COUNT)
            .store(channels, Ordering::Relaxed);
    }

    pub(crate) fn init_clock(&self, frequency: u64, audio_backend: u32) {
        self.u64_at(field::CLOCK_FREQUENCY)
            .store(frequency, Ordering::Relaxed);
        self.u32_at(field::AUDIO_BACKEND)
            .store(audio_backend, Ordering::Relaxed);
    }

    pub fn magic(&self) -> [u8; 4] {
        let bytes = self.map.bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }

    pub fn version(&self) -> u32 {
        self.u32_at(field::VERSION).load(Ordering::Acquire)
    }

    pub fn owner_pid(&self) -> u32 {
        self.u32_at(field::OWNER_PID).load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.u32_at(field::SAMPLE_RATE).load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, _guard: &MutexGuard<'_>, rate: u32) {
        self.u32_at(field::SAMPLE_RATE).store(rate, Ordering::Release);
    }

    pub fn frame_capacity(&self) -> u32 {
        self.u32_at(field::FRAME_CAPACITY).load(Ordering::Acquire)
    }

    pub fn channel_count(&self) -> u32 {
        self.u32_at(field::CHANNEL_COUNT).load(Ordering::Acquire)
    }

    pub fn companion_pid(&self) -> u32 {
        self.u32_at(field::COMPANION_PID).load(Ordering::Acquire)
    }

    pub fn set_companion_pid(&self, pid: u32) {
        self.u32_at(field::COMPANION_PID).store(pid, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Flags and takeover state (mutex guarded)
    // ---------------------------------------------------------------------

    /// A single atomic load never tears, so readers may skip the lock.
    pub fn flags(&self) -> BusFlags {
        BusFlags::from_bits_truncate(self.u32_at(field::FLAGS).load(Ordering::Acquire))
    }

    pub fn set_flags(&self, _guard: &MutexGuard<'_>, flags: BusFlags) {
        self.u32_at(field::FLAGS)
            .store(flags.bits(), Ordering::Release);
    }

    pub fn insert_flags(&self, guard: &MutexGuard<'_>, flags: BusFlags) {
        self.set_flags(guard, self.flags() | flags);
    }

    pub fn remove_flags(&self, guard: &MutexGuard<'_>, flags: BusFlags) {
        self.set_flags(guard, self.flags() - flags);
    }

    pub fn takeover_state(&self) -> TakeoverState {
        TakeoverState::from_raw(self.u32_at(field::TAKEOVER_STATE).load(Ordering::Acquire))
    }

    pub fn set_takeover_state(&self, _guard: &MutexGuard<'_>, state: TakeoverState) {
        self.u32_at(field::TAKEOVER_STATE)
            .store(state as u32, Ordering::Release);
    }

    pub fn queued_request(&self) -> TakeoverRequest {
        TakeoverRequest::from_raw(self.u32_at(field::QUEUED_REQUEST).load(Ordering::Acquire))
    }

    pub fn set_queued_request(&self, _guard: &MutexGuard<'_>, request: TakeoverRequest) {
        self.u32_at(field::QUEUED_REQUEST)
            .store(request as u32, Ordering::Release);
    }

    /// Latest request posted by the companion and its sequence number.
    pub fn companion_request(&self) -> (TakeoverRequest, u32) {
        let seq = self
            .u32_at(field::COMPANION_REQUEST_SEQ)
            .load(Ordering::Acquire);
        let request = TakeoverRequest::from_raw(
            self.u32_at(field::COMPANION_REQUEST).load(Ordering::Acquire),
        );
        (request, seq)
    }

    /// Companion only. The request is stored before the sequence is published.
    pub fn post_companion_request(&self, request: TakeoverRequest) -> u32 {
        self.u32_at(field::COMPANION_REQUEST)
            .store(request as u32, Ordering::Release);
        self.u32_at(field::COMPANION_REQUEST_SEQ)
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    // ---------------------------------------------------------------------
    // Heartbeat and update stamps
    // ---------------------------------------------------------------------

    pub fn heartbeat(&self) -> u64 {
        self.u64_at(field::HEARTBEAT).load(Ordering::Acquire)
    }

    pub fn bump_heartbeat(&self) -> u64 {
        self.u64_at(field::HEARTBEAT).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn last_update_ms(&self) -> u64 {
        self.u64_at(field::LAST_UPDATE_MS).load(Ordering::Acquire)
    }

    pub fn write_counter(&self) -> u64 {
        self.u64_at(field::WRITE_COUNTER).load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, _guard: &MutexGuard<'_>, wall_ms: u64) {
        self.u64_at(field::WRITE_COUNTER)
            .fetch_add(1, Ordering::AcqRel);
        self.u64_at(field::LAST_UPDATE_MS)
            .store(wall_ms, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Levels and voices (mutex guarded)
    // ---------------------------------------------------------------------

    pub fn master_peaks(&self) -> (f32, f32) {
        (
            self.f32_at(field::MASTER_PEAK_L),
            self.f32_at(field::MASTER_PEAK_R),
        )
    }

    pub fn set_master(
        &self,
        _guard: &MutexGuard<'_>,
        peak_l: f32,
        peak_r: f32,
        total_voices: u32,
        cpu_load: f32,
    ) {
        self.store_f32(field::MASTER_PEAK_L, peak_l);
        self.store_f32(field::MASTER_PEAK_R, peak_r);
        self.u32_at(field::TOTAL_VOICES)
            .store(total_voices, Ordering::Relaxed);
        self.store_f32(field::CPU_LOAD, cpu_load);
    }

    pub fn total_voices(&self) -> u32 {
        self.u32_at(field::TOTAL_VOICES).load(Ordering::Relaxed)
    }

    pub fn set_total_voices(&self, _guard: &MutexGuard<'_>, total: u32) {
        self.u32_at(field::TOTAL_VOICES)
            .store(total, Ordering::Relaxed);
    }

    pub fn cpu_load(&self) -> f32 {
        self.f32_at(field::CPU_LOAD)
    }

    /// `None` for out-of-range channels.
    pub fn channel(&self, channel: usize) -> Option<ChannelInfo> {
        if channel >= self.layout.channels() {
            return None;
        }
        let base = self.layout.channel_offset(channel);
        Some(ChannelInfo {
            peak_l: self.f32_at(base + field::CHANNEL_PEAK_L),
            peak_r: self.f32_at(base + field::CHANNEL_PEAK_R),
            voices: self
                .u32_at(base + field::CHANNEL_VOICES)
                .load(Ordering::Relaxed),
        })
    }

    pub fn set_channel_peaks(&self, _guard: &MutexGuard<'_>, channel: usize, l: f32, r: f32) {
        if channel >= self.layout.channels() {
            return;
        }
        let base = self.layout.channel_offset(channel);
        self.store_f32(base + field::CHANNEL_PEAK_L, l);
        self.store_f32(base + field::CHANNEL_PEAK_R, r);
    }

    pub fn set_channel_voices(&self, _guard: &MutexGuard<'_>, channel: usize, voices: u32) {
        if channel >= self.layout.channels() {
            return;
        }
        let base = self.layout.channel_offset(channel);
        self.u32_at(base + field::CHANNEL_VOICES)
            .store(voices, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // Latency instrumentation (single-writer stamps)
    // ---------------------------------------------------------------------

    pub fn clock_frequency(&self) -> u64 {
        self.u64_at(field::CLOCK_FREQUENCY).load(Ordering::Acquire)
    }

    fn stage_offset(stage: Stage) -> usize {
        match stage {
            Stage::MidiIn => field::LAST_MIDI_IN,
            Stage::SynthComplete => field::LAST_SYNTH_COMPLETE,
            Stage::RegionWrite => field::LAST_REGION_WRITE,
            Stage::RegionRead => field::LAST_REGION_READ,
            Stage::DeviceOutput => field::LAST_DEVICE_OUTPUT,
        }
    }

    pub fn stamp(&self, stage: Stage, ticks: u64) {
        self.u64_at(Self::stage_offset(stage))
            .store(ticks, Ordering::Release);
    }

    pub fn stamp_of(&self, stage: Stage) -> u64 {
        self.u64_at(Self::stage_offset(stage))
            .load(Ordering::Acquire)
    }

    pub fn latency_info(&self) -> (u32, u32, u32) {
        (
            self.u32_at(field::OUTPUT_LATENCY_US).load(Ordering::Relaxed),
            self.u32_at(field::INPUT_LATENCY_US).load(Ordering::Relaxed),
            self.u32_at(field::AUDIO_BACKEND).load(Ordering::Relaxed),
        )
    }

    pub fn set_latency_info(
        &self,
        _guard: &MutexGuard<'_>,
        output_us: u32,
        input_us: u32,
        backend: u32,
    ) {
        self.u32_at(field::OUTPUT_LATENCY_US)
            .store(output_us, Ordering::Relaxed);
        self.u32_at(field::INPUT_LATENCY_US)
            .store(input_us, Ordering::Relaxed);
        self.u32_at(field::AUDIO_BACKEND)
            .store(backend, Ordering::Relaxed);
    }

    pub fn derived_latency(&self) -> (u32, u32) {
        (
            self.u32_at(field::ROUND_TRIP_US).load(Ordering::Relaxed),
            self.u32_at(field::SYNTH_TO_OUTPUT_US)
                .load(Ordering::Relaxed),
        )
    }

    pub fn set_derived_latency(
        &self,
        _guard: &MutexGuard<'_>,
        round_trip_us: u32,
        synth_to_output_us: u32,
    ) {
        self.u32_at(field::ROUND_TRIP_US)
            .store(round_trip_us, Ordering::Relaxed);
        self.u32_at(field::SYNTH_TO_OUTPUT_US)
            .store(synth_to_output_us, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // Double-buffer indices and frame counters (lock-free)
    // ---------------------------------------------------------------------

    pub fn out_write_index(&self) -> usize {
        (self.u32_at(field::OUT_WRITE_INDEX).load(Ordering::Acquire) & 1) as usize
    }

    /// Flip the OUT write index and return the slot that was just filled.
    pub fn swap_out_write_index(&self) -> usize {
        (self
            .u32_at(field::OUT_WRITE_INDEX)
            .fetch_xor(1, Ordering::AcqRel)
            & 1) as usize
    }

    pub fn out_read_index(&self) -> usize {
        (self.u32_at(field::OUT_READ_INDEX).load(Ordering::Acquire) & 1) as usize
    }

    pub fn set_out_read_index(&self, index: usize) {
        self.u32_at(field::OUT_READ_INDEX)
            .store((index & 1) as u32, Ordering::Release);
    }

    pub fn in_write_index(&self) -> usize {
        (self.u32_at(field::IN_WRITE_INDEX).load(Ordering::Acquire) & 1) as usize
    }

    /// Flip the IN write index and return the slot that was just filled.
    pub fn swap_in_write_index(&self) -> usize {
        (self
            .u32_at(field::IN_WRITE_INDEX)
            .fetch_xor(1, Ordering::AcqRel)
            & 1) as usize
    }

    pub fn in_read_index(&self) -> usize {
        (self.u32_at(field::IN_READ_INDEX).load(Ordering::Acquire) & 1) as usize
    }

    pub fn set_in_read_index(&self, index: usize) {
        self.u32_at(field::IN_READ_INDEX)
            .store((index & 1) as u32, Ordering::Release);
    }

    pub fn out_frame_counter(&self) -> u64 {
        self.u64_at(field::OUT_FRAME_COUNTER)
            .load(Ordering::Acquire)
    }

    pub fn advance_out_frame_counter(&self) -> u64 {
        self.u64_at(field::OUT_FRAME_COUNTER)
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    pub fn in_frame_counter(&self) -> u64 {
        self.u64_at(field::IN_FRAME_COUNTER)
            .load(Ordering::Acquire)
    }

    pub fn advance_in_frame_counter(&self) -> u64 {
        self.u64_at(field::IN_FRAME_COUNTER)
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    /// Frames actually rendered into the last published OUT buffer.
    pub fn out_frame_samples(&self) -> usize {
        self.u32_at(field::OUT_FRAME_SAMPLES)
            .load(Ordering::Acquire) as usize
    }

    pub fn set_out_frame_samples(&self, frames: usize) {
        self.u32_at(field::OUT_FRAME_SAMPLES)
            .store(frames as u32, Ordering::Release);
    }

    /// Frames the companion produced in the last published IN buffer.
    pub fn in_frame_samples(&self) -> usize {
        self.u32_at(field::IN_FRAME_SAMPLES)
            .load(Ordering::Acquire) as usize
    }

    pub fn set_in_frame_samples(&self, frames: usize) {
        self.u32_at(field::IN_FRAME_SAMPLES)
            .store(frames as u32, Ordering::Release);
    }
}
