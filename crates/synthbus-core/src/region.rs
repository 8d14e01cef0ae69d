//! Memory-mapped named objects and the shared audio region.

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::header::{BusFlags, Header};
use crate::latency::LatencyClock;
use crate::layout::{field, RegionLayout, MAGIC, PROTOCOL_VERSION, SAMPLE_BYTES};
use crate::sync::{current_pid, process_alive};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// A file-backed mapping identified by a well-known path.
///
/// The creator owns the backing file and removes it on drop; openers only
/// unmap. Already-mapped views stay valid after the file is removed.
///
/// Creation never reuses an existing file: whatever sits at the path is
/// unlinked first, so processes still mapping it keep their own inode.
pub(crate) struct NamedMapping {
    _mmap: MmapMut,
    ptr: NonNull<u8>,
    len: usize,
    path: PathBuf,
    owns_file: bool,
    file_id: Option<FileId>,
}

/// Device and inode of a created file, so drop never unlinks a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId(u64, u64);

impl FileId {
    #[cfg(unix)]
    fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(FileId(metadata.dev(), metadata.ino()))
    }

    #[cfg(not(unix))]
    fn of(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

// SAFETY: the mapping is never remapped or resized after construction and all
// shared accesses go through atomics or through the single-writer slot protocol.
unsafe impl Send for NamedMapping {}
unsafe impl Sync for NamedMapping {}

impl NamedMapping {
    pub(crate) fn create(path: &Path, size: usize) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Unlinked previous shared memory file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BusError::SharedMemory(format!(
                    "Failed to remove previous shared memory file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(path).map_err(|e| {
            BusError::SharedMemory(format!(
                "Failed to create shared memory file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.set_len(size as u64).map_err(|e| {
            BusError::SharedMemory(format!("Failed to set file size: {}", e))
        })?;

        let file_id = file.metadata().ok().as_ref().and_then(FileId::of);
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BusError::SharedMemory(format!("Failed to create memory map: {}", e))
        })?;

        let mut map = Self::from_mmap(mmap, path, true)?;
        map.file_id = file_id;
        Ok(map)
    }

    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                BusError::SharedMemory(format!(
                    "Failed to open shared memory file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BusError::SharedMemory(format!("Failed to open memory map: {}", e))
        })?;

        Self::from_mmap(mmap, path, false)
    }

    fn from_mmap(mut mmap: MmapMut, path: &Path, owns_file: bool) -> Result<Self> {
        let len = mmap.len();
        let ptr = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| BusError::SharedMemory("Mapping returned a null view".to_string()))?;
        Ok(Self {
            _mmap: mmap,
            ptr,
            len,
            path: path.to_path_buf(),
            owns_file,
            file_id: None,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes, for validation of fields that are written once at creation.
    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: ptr/len describe the live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        assert!(offset + 4 <= self.len && offset % 4 == 0);
        // SAFETY: in bounds and aligned (the mapping base is page aligned).
        unsafe { &*(self.ptr.as_ptr().add(offset) as *const AtomicU32) }
    }

    pub(crate) fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        assert!(offset + 8 <= self.len && offset % 8 == 0);
        // SAFETY: in bounds and aligned (the mapping base is page aligned).
        unsafe { &*(self.ptr.as_ptr().add(offset) as *const AtomicU64) }
    }

    /// Caller must be the only writer of this byte range.
    pub(crate) fn write_bytes(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len);
        // SAFETY: bounds checked; exclusive writer by protocol.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len())
        };
    }

    /// Caller must be the only writer of this sample range.
    pub(crate) fn write_samples(&self, offset: usize, data: &[f32]) {
        assert!(offset % SAMPLE_BYTES == 0 && offset + std::mem::size_of_val(data) <= self.len);
        // SAFETY: bounds and alignment checked; exclusive writer by protocol.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset) as *mut f32,
                data.len(),
            )
        };
    }

    pub(crate) fn read_samples(&self, offset: usize, output: &mut [f32]) {
        assert!(offset % SAMPLE_BYTES == 0 && offset + std::mem::size_of_val(output) <= self.len);
        // SAFETY: bounds and alignment checked; the writer has published this
        // slot through an index swap before the reader looks at it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset) as *const f32,
                output.as_mut_ptr(),
                output.len(),
            )
        };
    }
}

impl Drop for NamedMapping {
    fn drop(&mut self) {
        if !self.owns_file {
            return;
        }
        // A later creator may have replaced the file at this path.
        if let Some(id) = self.file_id {
            let current = std::fs::metadata(&self.path).ok();
            if current.as_ref().and_then(FileId::of) != Some(id) {
                return;
            }
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// State of a region file found at the well-known path before creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingRegion {
    Absent,
    /// Foreign or damaged layout; safe to overwrite.
    Unrecognized,
    /// A valid header left behind by a process that is gone or inactive.
    Stale { owner_pid: u32 },
    /// A valid, active header whose owner is still running.
    Live { owner_pid: u32 },
}

/// The shared audio region: header plus double-buffered OUT and IN payloads.
pub struct SharedRegion {
    map: NamedMapping,
    layout: RegionLayout,
}

impl SharedRegion {
    /// Look at whatever currently sits at the region path without modifying it.
    pub fn inspect(config: &BusConfig) -> ExistingRegion {
        let path = config.region_path();
        if !path.exists() {
            return ExistingRegion::Absent;
        }
        let Ok(map) = NamedMapping::open(&path) else {
            return ExistingRegion::Unrecognized;
        };
        let Ok(layout) = RegionLayout::validate(map.bytes()) else {
            return ExistingRegion::Unrecognized;
        };

        let region = SharedRegion { map, layout };
        let header = region.header();
        let owner_pid = header.owner_pid();
        let active = header.flags().contains(BusFlags::ACTIVE);

        // Includes this process: a second host here would clobber the first.
        if active && process_alive(owner_pid) {
            ExistingRegion::Live { owner_pid }
        } else {
            ExistingRegion::Stale { owner_pid }
        }
    }

    /// Create and zero-initialise the region. Host only.
    ///
    /// A live owner, this process included, is reported as
    /// [`BusError::RegionBusy`]. A stale or unrecognised file is never
    /// reused: it is unlinked and a fresh file takes its place.
    pub fn create(config: &BusConfig) -> Result<Self> {
        config.validate()?;
        let layout = RegionLayout::from_config(config)?;

        match Self::inspect(config) {
            ExistingRegion::Live { owner_pid } => return Err(BusError::RegionBusy { owner_pid }),
            ExistingRegion::Stale { owner_pid } => {
                tracing::warn!(owner_pid, "Replacing stale audio bus region");
            }
            ExistingRegion::Unrecognized => {
                tracing::warn!("Replacing unrecognized file at audio bus region path");
            }
            ExistingRegion::Absent => {}
        }

        let map = NamedMapping::create(&config.region_path(), layout.total_size())?;
        let region = Self { map, layout };
        region.initialize(config);
        Ok(region)
    }

    /// Map an existing region, refusing anything with a foreign layout.
    pub fn open(config: &BusConfig) -> Result<Self> {
        let map = NamedMapping::open(&config.region_path())?;
        let layout = RegionLayout::validate(map.bytes())?;
        Ok(Self { map, layout })
    }

    /// The mapping is zero-filled by `set_len`; only non-zero fields are written.
    fn initialize(&self, config: &BusConfig) {
        let header = self.header();
        header.init_identity(
            current_pid(),
            config.sample_rate,
            self.layout.frame_capacity() as u32,
            self.layout.channels() as u32,
        );
        header.init_clock(LatencyClock::frequency(), config.audio_backend);
        // Magic goes last so a concurrent opener never validates a half-built header.
        self.map.write_bytes(field::MAGIC, &MAGIC);
        debug_assert_eq!(header.version(), PROTOCOL_VERSION);
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    pub fn header(&self) -> Header<'_> {
        Header::new(&self.map, &self.layout)
    }

    pub fn path(&self) -> &Path {
        self.map.path()
    }

    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }

    /// Copy interleaved stereo samples into a channel's OUT slot.
    ///
    /// Returns the number of samples written (truncated to slot capacity).
    /// Caller must be the single writer of that channel slot.
    pub fn write_out_slot(&self, channel: usize, index: usize, data: &[f32]) -> usize {
        self.write_out_slot_at(channel, index, 0, data)
    }

    /// Like [`write_out_slot`](Self::write_out_slot), starting `offset` samples into the slot.
    pub fn write_out_slot_at(&self, channel: usize, index: usize, offset: usize, data: &[f32]) -> usize {
        let capacity = self.layout.slot_samples();
        if channel >= self.layout.channels() || offset >= capacity {
            return 0;
        }
        let n = data.len().min(capacity - offset);
        let base = self.layout.out_slot(channel, index & 1) + offset * SAMPLE_BYTES;
        self.map.write_samples(base, &data[..n]);
        n
    }

    pub fn read_out_slot_into(&self, channel: usize, index: usize, output: &mut [f32]) -> usize {
        if channel >= self.layout.channels() {
            return 0;
        }
        let n = output.len().min(self.layout.slot_samples());
        self.map
            .read_samples(self.layout.out_slot(channel, index & 1), &mut output[..n]);
        n
    }

    /// Copy interleaved stereo samples into the IN slot. Companion only.
    pub fn write_in_slot(&self, index: usize, data: &[f32]) -> usize {
        let n = data.len().min(self.layout.slot_samples());
        self.map
            .write_samples(self.layout.in_slot(index & 1), &data[..n]);
        n
    }

    pub fn read_in_slot_into(&self, index: usize, output: &mut [f32]) -> usize {
        let n = output.len().min(self.layout.slot_samples());
        self.map
            .read_samples(self.layout.in_slot(index & 1), &mut output[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PROTOCOL_VERSION;

    fn test_config(dir: &tempfile::TempDir) -> BusConfig {
        BusConfig {
            shm_dir: Some(dir.path().to_path_buf()),
            channels: 4,
            frame_capacity: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_writes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let region = SharedRegion::create(&config).unwrap();
        let header = region.header();

        assert_eq!(header.magic(), MAGIC);
        assert_eq!(header.version(), PROTOCOL_VERSION);
        assert_eq!(header.owner_pid(), std::process::id());
        assert_eq!(header.channel_count(), 4);
        assert_eq!(header.frame_capacity(), 64);
        assert_eq!(header.sample_rate(), 48000);
        assert_eq!(header.out_frame_counter(), 0);
        assert_eq!(region.mapped_len(), region.layout().total_size());
    }

    #[test]
    fn test_open_sees_host_writes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let host = SharedRegion::create(&config).unwrap();
        let companion = SharedRegion::open(&config).unwrap();

        let block = [0.5f32, -0.5, 0.25, -0.25];
        assert_eq!(host.write_out_slot(2, 1, &block), 4);

        let mut out = [0.0f32; 4];
        assert_eq!(companion.read_out_slot_into(2, 1, &mut out), 4);
        assert_eq!(out, block);

        // Other slots untouched
        companion.read_out_slot_into(2, 0, &mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_slot_writes_truncate_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let region = SharedRegion::create(&config).unwrap();
        let oversized = vec![1.0f32; region.layout().slot_samples() + 10];
        assert_eq!(
            region.write_in_slot(0, &oversized),
            region.layout().slot_samples()
        );
        assert_eq!(region.write_out_slot(99, 0, &oversized), 0);
    }

    #[test]
    fn test_write_at_offset_appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let region = SharedRegion::create(&config).unwrap();
        let capacity = region.layout().slot_samples();

        assert_eq!(region.write_out_slot_at(1, 0, 0, &[0.1, 0.2]), 2);
        assert_eq!(region.write_out_slot_at(1, 0, 2, &[0.3, 0.4]), 2);
        assert_eq!(region.write_out_slot_at(1, 0, capacity - 1, &[0.5, 0.6]), 1);
        assert_eq!(region.write_out_slot_at(1, 0, capacity, &[0.7]), 0);

        let mut out = [0.0f32; 4];
        region.read_out_slot_into(1, 0, &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_open_missing_region_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        assert!(matches!(
            SharedRegion::open(&config),
            Err(BusError::SharedMemory(_))
        ));
    }

    #[test]
    fn test_inspect_classifies_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        assert_eq!(SharedRegion::inspect(&config), ExistingRegion::Absent);

        std::fs::write(config.region_path(), b"garbage").unwrap();
        assert_eq!(SharedRegion::inspect(&config), ExistingRegion::Unrecognized);

        let region = SharedRegion::create(&config).unwrap();
        // Not ACTIVE yet
        assert!(matches!(
            SharedRegion::inspect(&config),
            ExistingRegion::Stale { .. }
        ));
        drop(region);
        assert_eq!(SharedRegion::inspect(&config), ExistingRegion::Absent);
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_region_replaced_with_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let stale = SharedRegion::create(&config).unwrap();
        // An old companion still mapping the stale region.
        let old_view = SharedRegion::open(&config).unwrap();
        stale.write_out_slot(0, 0, &[0.5, 0.5]);

        let fresh = SharedRegion::create(&config).unwrap();
        let mut out = [0.0f32; 2];
        old_view.read_out_slot_into(0, 0, &mut out);
        assert_eq!(out, [0.5, 0.5]);
        fresh.read_out_slot_into(0, 0, &mut out);
        assert_eq!(out, [0.0, 0.0]);

        // Dropping the stale owner leaves the fresh file in place.
        drop(stale);
        assert!(config.region_path().exists());
        assert_eq!(
            SharedRegion::open(&config).unwrap().header().owner_pid(),
            current_pid()
        );
        drop(fresh);
        assert!(!config.region_path().exists());
    }
}
