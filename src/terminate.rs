use crate::sys;
use std::time::Duration;
use tokio::process::Command;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Liveness poll cadence while waiting for a signaled process to exit.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default budget for a graceful shutdown before escalation.
pub const DEFAULT_GRACEFUL_TIMEOUT_MS: u64 = 5000;

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// Send the graceful signal, poll for exit, escalate to SIGKILL at the
/// timeout (sweeping direct children as best-effort cleanup), and report
/// whether the process was confirmed dead at return time.
///
/// Signaling a pid that no longer exists is success: the goal "process not
/// running" is already satisfied.
pub async fn terminate_gracefully(pid: u32, graceful_timeout: Duration) -> bool {
    if !sys::is_pid_alive(pid) {
        return true;
    }

    let _ = sys::send_signal(pid, sys::GRACEFUL_SIGNAL);

    let deadline = tokio::time::Instant::now() + graceful_timeout;
    while sys::is_pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            kill_children(pid).await;
            let _ = sys::force_kill(pid);
            tokio::time::sleep(POLL_INTERVAL).await;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    !sys::is_pid_alive(pid)
}

/// Forcefully terminate `pid` and its direct children. Children first, so
/// a supervising shell cannot respawn or orphan them mid-sweep; absence of
/// children is success.
pub async fn terminate_tree(pid: u32) {
    kill_children(pid).await;
    let _ = sys::force_kill(pid);
}

/// Poll liveness until the process is gone or `max_wait` elapses; returns
/// whether it is gone. Callers that must not proceed while the process
/// could still hold its port (e.g. a restart) use this instead of assuming
/// signal delivery implies exit.
pub async fn verify_gone(pid: u32, max_wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        if !sys::is_pid_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Direct children of `pid` via pgrep. Exit code 1 means no children,
/// which is a normal empty result.
pub async fn child_pids(pid: u32) -> Vec<u32> {
    let pid_arg = pid.to_string();
    let result = Command::new("pgrep")
        .args(["-P", pid_arg.as_str()])
        .output()
        .await;
    let Ok(output) = result else {
        return Vec::new();
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_child_pids(&stdout)
}

pub fn parse_child_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| crate::sanitize::validate_pid(line.trim()).ok())
        .collect()
}

async fn kill_children(pid: u32) {
    for child in child_pids(pid).await {
        let _ = sys::force_kill(child);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawn a sleeper and reap it in the background, the way the session's
    /// exit monitor does; a zombie would otherwise keep answering liveness
    /// probes and stall the polls under test.
    fn spawn_sleeper() -> u32 {
        let mut child = tokio::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid");
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        pid
    }

    #[test]
    fn test_parse_child_pids() {
        assert_eq!(parse_child_pids("101\n102\n"), vec![101, 102]);
        assert_eq!(parse_child_pids(""), Vec::<u32>::new());
        assert_eq!(parse_child_pids("junk\n103\n"), vec![103]);
    }

    #[tokio::test]
    async fn test_terminate_dead_pid_is_success() {
        assert!(terminate_gracefully(4_000_000, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn test_verify_gone_dead_pid_immediate() {
        let before = tokio::time::Instant::now();
        assert!(verify_gone(4_000_000, Duration::from_secs(5)).await);
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_terminate_gracefully_kills_process() {
        let pid = spawn_sleeper();
        assert!(terminate_gracefully(pid, Duration::from_secs(5)).await);
        assert!(verify_gone(pid, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_terminate_tree_kills_parent() {
        let pid = spawn_sleeper();
        terminate_tree(pid).await;
        assert!(verify_gone(pid, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_verify_gone_times_out_on_live_process() {
        let pid = spawn_sleeper();
        assert!(!verify_gone(pid, Duration::from_millis(300)).await);
        terminate_tree(pid).await;
        assert!(verify_gone(pid, Duration::from_secs(5)).await);
    }
}
