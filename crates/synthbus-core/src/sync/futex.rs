//! Blocking wait on a shared 32-bit word.
//!
//! Linux uses a shared (non-private) futex so waiters in other processes
//! mapping the same file are woken. Other platforms have no cross-process
//! wait on a mapped word, so there the wait is a short sleep and the caller
//! re-checks the word: wakeups arrive up to 200 µs late and an idle
//! waiter polls instead of sleeping in the kernel.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // SAFETY: word points into a live shared mapping; EAGAIN, EINTR and
    // ETIMEDOUT are all handled by the caller re-checking the word.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn wake_all(word: &AtomicU32) {
    // SAFETY: word points into a live shared mapping.
    unsafe {
        libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
    }
}

/// Latency bound of a wakeup without futexes.
#[cfg(not(target_os = "linux"))]
pub(crate) const POLL_INTERVAL: Duration = Duration::from_micros(200);

#[cfg(not(target_os = "linux"))]
pub(crate) fn wait(_word: &AtomicU32, _expected: u32, timeout: Duration) {
    std::thread::sleep(timeout.min(POLL_INTERVAL));
}

/// Waiters notice the word change on their next poll.
#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_all(_word: &AtomicU32) {}
