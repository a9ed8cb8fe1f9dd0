use crate::notifier::Notifier;
use crate::sanitize::{self, InvalidInput};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Command-line signature of the server family we supervise. Owned
/// constant; never assembled from user input.
pub const SERVER_SIGNATURE: &str = "evidence dev";

/// Sentinel used when a working directory cannot be resolved.
pub const UNKNOWN_CWD: &str = "Unknown";

/// Display cutoff for command lines in instance listings.
const COMMAND_DISPLAY_LEN: usize = 80;

/// Consecutive failures of the discovery pipeline before the user is told
/// that detection itself is broken (as opposed to "nothing is running").
const FAILURE_WARN_THRESHOLD: u32 = 3;

/// Minimum gap between detection-failure warnings.
const FAILURE_WARN_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("process listing failed: {0}")]
    DetectionFailed(String),
    #[error("socket probe failed: {0}")]
    ProbeFailed(std::io::Error),
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
}

// ---------------------------------------------------------------------------
// ProcessRecord
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of one discovered server instance. Produced
/// fresh on every query and discarded after use; holders must re-verify
/// liveness before acting on it destructively.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command_line: String,
    pub working_directory: String,
    pub listening_port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Parse `ps -eo pid=,args=` output into (pid, command line) pairs whose
/// command line matches `signature` case-insensitively. Pids are
/// re-validated through the sanitizer even though they came from ps.
pub fn parse_candidates(output: &str, signature: &str, self_pid: u32) -> Vec<(u32, String)> {
    let needle = signature.to_lowercase();
    let mut candidates = Vec::new();
    for line in output.lines() {
        let line = line.trim_start();
        let Some((pid_field, command)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let Ok(pid) = sanitize::validate_pid(pid_field) else {
            continue;
        };
        let command = command.trim();
        if pid != self_pid && command.to_lowercase().contains(&needle) {
            candidates.push((pid, command.to_string()));
        }
    }
    candidates
}

/// Extract the first listening port from `lsof -iTCP -sTCP:LISTEN` output,
/// matching the `:<port> (LISTEN)` shape.
pub fn parse_listen_port(output: &str) -> Option<u16> {
    for line in output.lines() {
        let Some(idx) = line.find(" (LISTEN)") else {
            continue;
        };
        let before = &line[..idx];
        let Some(port_field) = before.rsplit(':').next() else {
            continue;
        };
        if let Ok(port) = port_field.trim().parse::<u16>() {
            return Some(port);
        }
    }
    None
}

/// Extract the working directory from `lsof -d cwd -Fn` output (the field
/// line starting with `n`).
pub fn parse_cwd(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(path) = line.strip_prefix('n')
            && path.starts_with('/')
        {
            return Some(path.to_string());
        }
    }
    None
}

/// Replace a home-directory prefix with `~` for display.
pub fn shorten_home(path: &str, home: Option<&str>) -> String {
    if let Some(home) = home
        && !home.is_empty()
        && let Some(rest) = path.strip_prefix(home)
        && (rest.is_empty() || rest.starts_with('/'))
    {
        return format!("~{rest}");
    }
    path.to_string()
}

/// Cut an overlong command line at a fixed width with an ellipsis.
pub fn truncate_command(command: &str) -> String {
    if command.chars().count() <= COMMAND_DISPLAY_LEN {
        return command.to_string();
    }
    let truncated: String = command.chars().take(COMMAND_DISPLAY_LEN).collect();
    format!("{truncated}…")
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub struct Discovery {
    notifier: Arc<dyn Notifier>,
    consecutive_failures: AtomicU32,
    last_failure_warning: Mutex<Option<tokio::time::Instant>>,
}

impl Discovery {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            consecutive_failures: AtomicU32::new(0),
            last_failure_warning: Mutex::new(None),
        }
    }

    /// List processes whose command line matches the server signature.
    /// A clean run with zero matches is a normal empty result; only a
    /// failure of the listing tool itself is an error.
    pub async fn list_candidates(&self) -> Result<Vec<(u32, String)>, DiscoverError> {
        let output = Command::new("ps")
            .args(["-eo", "pid=,args="])
            .output()
            .await
            .map_err(DiscoverError::ProbeFailed)?;

        if !output.status.success() {
            return Err(DiscoverError::DetectionFailed(format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_candidates(
            &stdout,
            SERVER_SIGNATURE,
            std::process::id(),
        ))
    }

    /// Confirm that `pid` owns a TCP socket in LISTEN state and return its
    /// port. "Exists but not listening" is `Ok(None)` — that is how build
    /// steps and incidental command-line matches are filtered out.
    pub async fn confirm_listening(&self, pid: u32) -> Result<Option<u16>, DiscoverError> {
        let pid_arg = sanitize::validate_pid(&pid.to_string())?.to_string();
        let output = Command::new("lsof")
            .args(["-a", "-p", pid_arg.as_str(), "-iTCP", "-sTCP:LISTEN", "-P", "-n"])
            .output()
            .await
            .map_err(DiscoverError::ProbeFailed)?;

        // lsof exits 1 when nothing matched; that is a normal "not a
        // server" answer, not a probe failure.
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_listen_port(&stdout))
    }

    /// Best-effort working directory lookup. Informational only, so every
    /// failure collapses to the `Unknown` sentinel.
    pub async fn working_directory(&self, pid: u32) -> String {
        let Ok(pid) = sanitize::validate_pid(&pid.to_string()) else {
            return UNKNOWN_CWD.to_string();
        };
        let pid_arg = pid.to_string();
        let result = Command::new("lsof")
            .args(["-a", "-p", pid_arg.as_str(), "-d", "cwd", "-Fn"])
            .output()
            .await;
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                parse_cwd(&stdout).unwrap_or_else(|| UNKNOWN_CWD.to_string())
            }
            Err(_) => UNKNOWN_CWD.to_string(),
        }
    }

    /// Snapshot of every confirmed-listening instance of the server family.
    ///
    /// Never errors: an unexpected failure yields an empty list and bumps a
    /// consecutive-failure counter, and once that counter crosses the
    /// threshold a throttled warning tells the user detection is broken —
    /// the status surface must not claim "no servers" when the probe itself
    /// is failing. No ordering guarantee on the result.
    pub async fn running_instances(&self) -> Vec<ProcessRecord> {
        match self.collect_instances().await {
            Ok(records) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                records
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                eprintln!("instance discovery failed ({failures} in a row): {e}");
                if failures >= FAILURE_WARN_THRESHOLD {
                    self.warn_detection_failing().await;
                }
                Vec::new()
            }
        }
    }

    pub async fn instance_count(&self) -> usize {
        self.running_instances().await.len()
    }

    async fn collect_instances(&self) -> Result<Vec<ProcessRecord>, DiscoverError> {
        let candidates = self.list_candidates().await?;

        let mut seen = HashSet::new();
        let home = dirs::home_dir().map(|p| p.to_string_lossy().into_owned());
        let mut records = Vec::new();

        for (pid, command_line) in candidates {
            if !seen.insert(pid) {
                continue;
            }
            let Some(port) = self.confirm_listening(pid).await? else {
                continue;
            };
            let cwd = self.working_directory(pid).await;
            records.push(ProcessRecord {
                pid,
                command_line: truncate_command(&command_line),
                working_directory: shorten_home(&cwd, home.as_deref()),
                listening_port: Some(port),
            });
        }

        Ok(records)
    }

    async fn warn_detection_failing(&self) {
        let mut last = self.last_failure_warning.lock().await;
        let now = tokio::time::Instant::now();
        let due = match *last {
            Some(at) => now.duration_since(at) >= FAILURE_WARN_INTERVAL,
            None => true,
        };
        if due {
            *last = Some(now);
            self.notifier.warn(
                "server detection is failing repeatedly; instance listings may be incomplete \
                 (this is not the same as no servers running)",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
