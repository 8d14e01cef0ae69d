//! Cross-process auto-reset signal.

use super::futex;
use crate::error::Result;
use crate::region::NamedMapping;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const SIGNAL_FILE_SIZE: usize = 64;

/// One-shot wake-up between processes.
///
/// `set` latches the signal and wakes a waiter; a successful `wait` consumes
/// it, so each `set` releases at most one `wait`. A `set` with no waiter stays
/// latched until the next `wait` or `reset`.
pub struct Signal {
    map: NamedMapping,
}

impl Signal {
    /// Create a fresh signal file, unlinking any previous one. Host only.
    pub fn create(path: &Path) -> Result<Self> {
        let map = NamedMapping::create(path, SIGNAL_FILE_SIZE)?;
        Ok(Self { map })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let map = NamedMapping::open(path)?;
        if map.len() < 4 {
            return Err(crate::error::BusError::SizeMismatch {
                expected: SIGNAL_FILE_SIZE,
                found: map.len(),
            });
        }
        Ok(Self { map })
    }

    #[inline]
    fn word(&self) -> &AtomicU32 {
        self.map.atomic_u32(0)
    }

    pub fn path(&self) -> &Path {
        self.map.path()
    }

    pub fn set(&self) {
        self.word().store(1, Ordering::Release);
        futex::wake_all(self.word());
    }

    pub fn reset(&self) {
        self.word().store(0, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.word().load(Ordering::Acquire) != 0
    }

    /// Consume the signal if it is set, without blocking.
    pub fn try_take(&self) -> bool {
        self.word()
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` if the signal was consumed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_take() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            futex::wait(self.word(), 0, deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_then_wait_consumes() {
        let dir = tempfile::tempdir().unwrap();
        let signal = Signal::create(&dir.path().join("sig")).unwrap();

        assert!(!signal.is_set());
        signal.set();
        assert!(signal.is_set());
        assert!(signal.wait(Duration::from_millis(1)));
        // Auto-reset
        assert!(!signal.is_set());
        assert!(!signal.try_take());
    }

    #[test]
    fn test_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let signal = Signal::create(&dir.path().join("sig")).unwrap();

        let start = Instant::now();
        assert!(!signal.wait(Duration::from_millis(15)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(15));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_wakes_waiter_through_second_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig");
        let owner = Signal::create(&path).unwrap();
        let peer = Arc::new(Signal::open(&path).unwrap());

        let waiter = {
            let peer = Arc::clone(&peer);
            std::thread::spawn(move || peer.wait(Duration::from_secs(2)))
        };
        std::thread::sleep(Duration::from_millis(10));
        owner.set();
        assert!(waiter.join().unwrap());
        assert!(!owner.is_set());
    }

    #[test]
    fn test_reset_drops_latched_set() {
        let dir = tempfile::tempdir().unwrap();
        let signal = Signal::create(&dir.path().join("sig")).unwrap();
        signal.set();
        signal.reset();
        assert!(!signal.wait(Duration::from_millis(1)));
    }
}
