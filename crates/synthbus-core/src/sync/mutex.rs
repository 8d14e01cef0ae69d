//! Cross-process metadata mutex.
//!
//! The lock word holds the pid of the holder, 0 when free. A holder that died
//! without unlocking is detected through its pid and the lock is stolen.

use super::{current_pid, process_alive};
use crate::error::{BusError, Result};
use crate::region::NamedMapping;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const MUTEX_FILE_SIZE: usize = 64;
const SPIN_LIMIT: u32 = 64;
const BACKOFF: Duration = Duration::from_micros(50);

pub struct NamedMutex {
    map: NamedMapping,
    name: String,
}

impl NamedMutex {
    /// Create a fresh mutex file, unlinking any previous one. Host only.
    pub fn create(path: &Path, name: &str) -> Result<Self> {
        let map = NamedMapping::create(path, MUTEX_FILE_SIZE)?;
        Ok(Self {
            map,
            name: name.to_string(),
        })
    }

    pub fn open(path: &Path, name: &str) -> Result<Self> {
        let map = NamedMapping::open(path)?;
        if map.len() < 4 {
            return Err(BusError::SizeMismatch {
                expected: MUTEX_FILE_SIZE,
                found: map.len(),
            });
        }
        Ok(Self {
            map,
            name: name.to_string(),
        })
    }

    #[inline]
    fn word(&self) -> &AtomicU32 {
        self.map.atomic_u32(0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pid of the current holder, 0 when unlocked.
    pub fn holder(&self) -> u32 {
        self.word().load(Ordering::Acquire)
    }

    /// Zero-timeout attempt. Safe to call from the audio thread.
    pub fn try_lock(&self) -> Option<MutexGuard<'_>> {
        self.word()
            .compare_exchange(0, current_pid(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Bounded wait. Never call from the audio thread.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;

        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            if let Some(guard) = self.recover_abandoned() {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                return Err(BusError::LockTimeout {
                    name: self.name.clone(),
                    duration_ms: timeout.as_millis() as u64,
                });
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::sleep(BACKOFF);
            }
        }
    }

    fn recover_abandoned(&self) -> Option<MutexGuard<'_>> {
        let holder = self.holder();
        if holder == 0 || holder == current_pid() || process_alive(holder) {
            return None;
        }
        self.word()
            .compare_exchange(holder, current_pid(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| {
                tracing::warn!(mutex = %self.name, holder, "Recovered lock abandoned by dead process");
                MutexGuard { mutex: self }
            })
    }
}

/// Proof that the metadata mutex is held. Unlocks on drop.
pub struct MutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl std::fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard")
            .field("mutex", &self.mutex.name)
            .finish()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.word().store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = NamedMutex::create(&dir.path().join("mtx"), "mtx").unwrap();

        let guard = mutex.try_lock().unwrap();
        assert_eq!(mutex.holder(), std::process::id());
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert_eq!(mutex.holder(), 0);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_lock_timeout_expires() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtx");
        let mutex = NamedMutex::create(&path, "mtx").unwrap();
        let other = NamedMutex::open(&path, "mtx").unwrap();

        let _guard = mutex.try_lock().unwrap();
        let start = Instant::now();
        let err = other.lock_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert!(matches!(err, BusError::LockTimeout { duration_ms: 5, .. }));
    }

    #[test]
    fn test_lock_timeout_acquires_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtx");
        let mutex = Arc::new(NamedMutex::create(&path, "mtx").unwrap());

        let guard = mutex.try_lock().unwrap();
        let contender = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || mutex.lock_timeout(Duration::from_secs(2)).is_ok())
        };
        std::thread::sleep(Duration::from_millis(5));
        drop(guard);
        assert!(contender.join().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_recovers_lock_held_by_dead_process() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = NamedMutex::create(&dir.path().join("mtx"), "mtx").unwrap();

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        mutex.word().store(dead_pid, Ordering::Release);
        assert!(mutex.try_lock().is_none());
        let guard = mutex.lock_timeout(Duration::from_millis(50)).unwrap();
        assert_eq!(mutex.holder(), std::process::id());
        drop(guard);
    }
}
