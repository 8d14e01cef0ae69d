//! Cross-process synchronization: one metadata mutex and auto-reset signals.

mod futex;
mod mutex;
mod signal;

pub use mutex::{MutexGuard, NamedMutex};
pub use signal::Signal;

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether a process with this pid still exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: signal 0 performs the permission and existence check only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to another user.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with this pid still exists.
#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
    use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    const STILL_ACTIVE: u32 = 259;

    if pid == 0 {
        return false;
    }
    // SAFETY: the handle is only used for the exit code query and closed here.
    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => handle,
            // Exists but belongs to a more privileged user.
            Err(e) => return e.code() == ERROR_ACCESS_DENIED.to_hresult(),
        };
        let mut code = 0u32;
        let alive = GetExitCodeProcess(handle, &mut code).is_ok() && code == STILL_ACTIVE;
        let _ = CloseHandle(handle);
        alive
    }
}

/// No liveness check on this platform: every non-zero owner counts as alive, so a lock
/// abandoned by a dead holder is never recovered.
#[cfg(not(any(unix, windows)))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(current_pid()));
        assert!(!process_alive(0));
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn test_exited_process_is_dead() {
        #[cfg(unix)]
        let mut child = std::process::Command::new("true").spawn().unwrap();
        #[cfg(windows)]
        let mut child = std::process::Command::new("cmd")
            .args(["/C", "exit"])
            .spawn()
            .unwrap();

        let pid = child.id();
        child.wait().unwrap();
        // Reaped, so the pid no longer names a process.
        assert!(!process_alive(pid));
    }
}
