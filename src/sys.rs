use std::io;

// =========================================================================
// Unix signal / liveness layer
// =========================================================================

pub use nix::sys::signal::Signal;

/// Cooperative shutdown signal sent before escalating.
pub const GRACEFUL_SIGNAL: Signal = Signal::SIGTERM;

pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal)
        .map_err(io::Error::other)
}

/// Zero-effect existence probe (signal 0).
pub fn is_pid_alive(pid: u32) -> bool {
    check_pid(pid).unwrap_or(false)
}

/// ESRCH means the process is gone; EPERM means it exists but is not ours.
pub fn check_pid(pid: u32) -> Result<bool, io::Error> {
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(io::Error::other(e)),
    }
}

pub fn force_kill(pid: u32) -> io::Result<()> {
    send_signal(pid, Signal::SIGKILL)
}

/// Resolves when the host asks us to shut down.
pub async fn signal_shutdown() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();
    let mut sigint =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).unwrap();

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pid_alive_self() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn test_is_pid_alive_bogus() {
        // High pid that almost certainly does not exist
        assert!(!is_pid_alive(4_000_000));
    }

    #[test]
    fn test_check_pid_maps_esrch_to_false() {
        assert_eq!(check_pid(4_000_000).unwrap(), false);
    }

    #[test]
    fn test_send_signal_to_dead_pid_errors() {
        assert!(send_signal(4_000_000, GRACEFUL_SIGNAL).is_err());
    }
}
