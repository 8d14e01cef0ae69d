//! Binary layout of the shared region.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Header (208 bytes fixed + 16 bytes × channel count)          │
//! │    identity, format, flags, takeover state, heartbeat,        │
//! │    levels, latency stamps, buffer indices, frame counters,    │
//! │    per-channel metadata                                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  padding to a 64-byte boundary                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  OUT region: channel × {buffer 0, buffer 1}                   │
//! │    each slot = frame_capacity × 2 samples × 4 bytes           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  IN region: {buffer 0, buffer 1}, stereo                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fields are native-endian and naturally aligned, so the header has no
//! implicit padding. Offsets are computed once by [`RegionLayout`] and checked
//! against the mapped length before any typed view is handed out.

use crate::config::{BusConfig, MAX_CHANNELS, MAX_FRAME_CAPACITY};
use crate::error::{BusError, Result};

/// Magic bytes: "SBUS" = SynthBus.
pub const MAGIC: [u8; 4] = *b"SBUS";

/// Bump whenever any offset below changes.
pub const PROTOCOL_VERSION: u32 = 3;

/// Interleaved stereo.
pub const SAMPLES_PER_FRAME: usize = 2;
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Number of buffers per direction.
pub const BUFFER_COUNT: usize = 2;

const PAYLOAD_ALIGN: usize = 64;

/// Byte offsets of the fixed header fields.
pub mod field {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const OWNER_PID: usize = 8;
    pub const SAMPLE_RATE: usize = 12;
    pub const FRAME_CAPACITY: usize = 16;
    pub const CHANNEL_COUNT: usize = 20;
    pub const FLAGS: usize = 24;
    pub const TAKEOVER_STATE: usize = 28;
    pub const QUEUED_REQUEST: usize = 32;
    pub const COMPANION_REQUEST: usize = 36;
    pub const COMPANION_REQUEST_SEQ: usize = 40;
    pub const COMPANION_PID: usize = 44;
    pub const HEARTBEAT: usize = 48;
    pub const LAST_UPDATE_MS: usize = 56;
    pub const WRITE_COUNTER: usize = 64;
    pub const MASTER_PEAK_L: usize = 72;
    pub const MASTER_PEAK_R: usize = 76;
    pub const TOTAL_VOICES: usize = 80;
    pub const CPU_LOAD: usize = 84;
    pub const CLOCK_FREQUENCY: usize = 88;
    pub const LAST_MIDI_IN: usize = 96;
    pub const LAST_SYNTH_COMPLETE: usize = 104;
    pub const LAST_DEVICE_OUTPUT: usize = 112;
    pub const LAST_REGION_WRITE: usize = 120;
    pub const LAST_REGION_READ: usize = 128;
    pub const OUTPUT_LATENCY_US: usize = 136;
    pub const INPUT_LATENCY_US: usize = 140;
    pub const ROUND_TRIP_US: usize = 144;
    pub const SYNTH_TO_OUTPUT_US: usize = 148;
    pub const AUDIO_BACKEND: usize = 152;
    pub const OUT_WRITE_INDEX: usize = 156;
    pub const OUT_READ_INDEX: usize = 160;
    pub const IN_WRITE_INDEX: usize = 164;
    pub const IN_READ_INDEX: usize = 168;
    pub const OUT_FRAME_SAMPLES: usize = 172;
    pub const OUT_FRAME_COUNTER: usize = 176;
    pub const IN_FRAME_COUNTER: usize = 184;
    pub const IN_FRAME_SAMPLES: usize = 192;
    /// 12 reserved bytes follow `IN_FRAME_SAMPLES`.
    pub const CHANNELS: usize = 208;

    /// Per-channel record: peak L (f32), peak R (f32), voices (u32), reserved (u32).
    pub const CHANNEL_STRIDE: usize = 16;
    pub const CHANNEL_PEAK_L: usize = 0;
    pub const CHANNEL_PEAK_R: usize = 4;
    pub const CHANNEL_VOICES: usize = 8;
}

/// Offsets of every part of the region for one channel count and frame capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    channels: usize,
    frame_capacity: usize,
    header_size: usize,
    out_offset: usize,
    in_offset: usize,
    slot_bytes: usize,
    total_size: usize,
}

impl RegionLayout {
    pub fn new(channels: u32, frame_capacity: u32) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(BusError::InvalidConfig(format!(
                "channel count {} out of range",
                channels
            )));
        }
        if frame_capacity == 0 || frame_capacity > MAX_FRAME_CAPACITY {
            return Err(BusError::InvalidConfig(format!(
                "frame capacity {} out of range",
                frame_capacity
            )));
        }

        let channels = channels as usize;
        let frame_capacity = frame_capacity as usize;

        let header_size = field::CHANNELS + channels * field::CHANNEL_STRIDE;
        let out_offset = header_size.div_ceil(PAYLOAD_ALIGN) * PAYLOAD_ALIGN;
        let slot_bytes = frame_capacity * SAMPLES_PER_FRAME * SAMPLE_BYTES;
        let in_offset = out_offset + channels * BUFFER_COUNT * slot_bytes;
        let total_size = in_offset + BUFFER_COUNT * slot_bytes;

        Ok(Self {
            channels,
            frame_capacity,
            header_size,
            out_offset,
            in_offset,
            slot_bytes,
            total_size,
        })
    }

    pub fn from_config(config: &BusConfig) -> Result<Self> {
        Self::new(config.channels, config.frame_capacity)
    }

    /// Validate the identity fields of a mapped region and derive its layout.
    ///
    /// Nothing past the fixed identity fields is interpreted unless magic,
    /// version and total size all match.
    pub fn validate(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < field::CHANNELS {
            return Err(BusError::SizeMismatch {
                expected: field::CHANNELS,
                found: bytes.len(),
            });
        }
        if bytes[field::MAGIC..field::MAGIC + 4] != MAGIC {
            return Err(BusError::BadMagic);
        }

        let version = read_u32(bytes, field::VERSION);
        if version != PROTOCOL_VERSION {
            return Err(BusError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        let layout = Self::new(
            read_u32(bytes, field::CHANNEL_COUNT),
            read_u32(bytes, field::FRAME_CAPACITY),
        )?;
        if bytes.len() != layout.total_size {
            return Err(BusError::SizeMismatch {
                expected: layout.total_size,
                found: bytes.len(),
            });
        }
        Ok(layout)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Bytes in one stereo slot.
    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Interleaved samples one slot holds.
    pub fn slot_samples(&self) -> usize {
        self.frame_capacity * SAMPLES_PER_FRAME
    }

    pub fn channel_offset(&self, channel: usize) -> usize {
        debug_assert!(channel < self.channels);
        field::CHANNELS + channel * field::CHANNEL_STRIDE
    }

    /// Offset of a channel's OUT slot for buffer index 0 or 1.
    pub fn out_slot(&self, channel: usize, index: usize) -> usize {
        debug_assert!(channel < self.channels && index < BUFFER_COUNT);
        self.out_offset + (channel * BUFFER_COUNT + index) * self.slot_bytes
    }

    /// Offset of the stereo IN slot for buffer index 0 or 1.
    pub fn in_slot(&self, index: usize) -> usize {
        debug_assert!(index < BUFFER_COUNT);
        self.in_offset + index * self.slot_bytes
    }

    pub fn out_region(&self) -> std::ops::Range<usize> {
        self.out_offset..self.in_offset
    }

    pub fn in_region(&self) -> std::ops::Range<usize> {
        self.in_offset..self.total_size
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_bytes(layout: &RegionLayout, version: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; layout.total_size()];
        bytes[field::MAGIC..field::MAGIC + 4].copy_from_slice(&MAGIC);
        bytes[field::VERSION..field::VERSION + 4].copy_from_slice(&version.to_ne_bytes());
        bytes[field::CHANNEL_COUNT..field::CHANNEL_COUNT + 4]
            .copy_from_slice(&(layout.channels() as u32).to_ne_bytes());
        bytes[field::FRAME_CAPACITY..field::FRAME_CAPACITY + 4]
            .copy_from_slice(&(layout.frame_capacity() as u32).to_ne_bytes());
        bytes
    }

    #[test]
    fn test_default_layout_sizes() {
        let layout = RegionLayout::new(16, 256).unwrap();
        assert_eq!(layout.header_size(), 208 + 16 * 16);
        assert_eq!(layout.out_region().start % 64, 0);
        assert_eq!(layout.slot_bytes(), 256 * 2 * 4);
        assert_eq!(layout.out_region().len(), 16 * 2 * 2048);
        assert_eq!(layout.in_region().len(), 2 * 2048);
        assert_eq!(
            layout.total_size(),
            layout.out_region().start + 18 * layout.slot_bytes()
        );
    }

    #[test]
    fn test_wide_fields_are_aligned() {
        for offset in [
            field::HEARTBEAT,
            field::LAST_UPDATE_MS,
            field::WRITE_COUNTER,
            field::CLOCK_FREQUENCY,
            field::LAST_MIDI_IN,
            field::LAST_REGION_READ,
            field::OUT_FRAME_COUNTER,
            field::IN_FRAME_COUNTER,
        ] {
            assert_eq!(offset % 8, 0, "offset {} not 8-byte aligned", offset);
        }
        assert!(field::IN_FRAME_SAMPLES + 4 <= field::CHANNELS);
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let layout = RegionLayout::new(3, 64).unwrap();
        let mut starts = Vec::new();
        for ch in 0..3 {
            for idx in 0..2 {
                starts.push(layout.out_slot(ch, idx));
            }
        }
        starts.push(layout.in_slot(0));
        starts.push(layout.in_slot(1));
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], layout.slot_bytes());
        }
        assert_eq!(layout.in_slot(1) + layout.slot_bytes(), layout.total_size());
    }

    #[test]
    fn test_validate_accepts_matching_region() {
        let layout = RegionLayout::new(4, 128).unwrap();
        let bytes = identity_bytes(&layout, PROTOCOL_VERSION);
        assert_eq!(RegionLayout::validate(&bytes).unwrap(), layout);
    }

    #[test]
    fn test_validate_rejects_foreign_regions() {
        let layout = RegionLayout::new(4, 128).unwrap();

        let bytes = identity_bytes(&layout, PROTOCOL_VERSION + 1);
        assert!(matches!(
            RegionLayout::validate(&bytes),
            Err(BusError::VersionMismatch { found, .. }) if found == PROTOCOL_VERSION + 1
        ));

        let mut bytes = identity_bytes(&layout, PROTOCOL_VERSION);
        bytes[0] = b'X';
        assert!(matches!(
            RegionLayout::validate(&bytes),
            Err(BusError::BadMagic)
        ));

        let mut bytes = identity_bytes(&layout, PROTOCOL_VERSION);
        bytes.truncate(layout.total_size() - 4);
        assert!(matches!(
            RegionLayout::validate(&bytes),
            Err(BusError::SizeMismatch { .. })
        ));

        assert!(RegionLayout::validate(&[0u8; 16]).is_err());
    }
}
