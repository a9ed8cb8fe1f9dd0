use crate::config::Settings;
use crate::discover::{self, Discovery};
use crate::logs::{self, CHANNEL_DEBUG, CHANNEL_SERVER, LogChannels};
use crate::notifier::Notifier;
use crate::pm;
use crate::sanitize;
use crate::sys;
use crate::terminate;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{RwLock, watch};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Cadence of the listening-socket probe during startup.
const PORT_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Pause between a completed stop and the follow-up start of a restart,
/// letting the old port drain.
const RESTART_SETTLE_DELAY: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a managed dev server is already running")]
    AlreadyRunning,
    #[error("no managed dev server is running")]
    NotRunning,
    #[error("another lifecycle operation is already in progress")]
    Busy,
    #[error("{} is not a project directory (missing package.json)", .0.display())]
    NotAProject(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] sanitize::InvalidInput),
    #[error("failed to spawn dev server: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("dev server exited during startup")]
    ExitedEarly,
}

// ---------------------------------------------------------------------------
// ManagedServer
// ---------------------------------------------------------------------------

/// The one process this session spawned and is authoritative over. The
/// spawned `Child` itself is owned by the exit-monitor task; the session
/// tracks the pid and metadata.
#[derive(Debug, Clone)]
pub struct ManagedServer {
    pub pid: u32,
    pub working_directory: PathBuf,
    pub port: u16,
    pub url: String,
    /// False when the port is a best guess (stdout parse or configured
    /// default) that the socket probe never confirmed.
    pub port_confirmed: bool,
    pub started_at: tokio::time::Instant,
    pub last_activity: tokio::time::Instant,
}

// ---------------------------------------------------------------------------
// ServerSession
// ---------------------------------------------------------------------------

/// Owns the lifecycle of at most one dev server. All lifecycle operations
/// are serialized through an in-flight guard: a second start/stop/restart
/// while one is running is rejected with `Busy`, never interleaved.
pub struct ServerSession {
    workspace: PathBuf,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    discovery: Arc<Discovery>,
    channels: Arc<LogChannels>,
    state: Arc<RwLock<Option<ManagedServer>>>,
    busy: AtomicBool,
}

/// Releases the in-flight flag on every exit path.
struct OpGuard<'a>(&'a AtomicBool);

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ServerSession {
    pub fn new(
        workspace: PathBuf,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
        discovery: Arc<Discovery>,
        channels: Arc<LogChannels>,
    ) -> Self {
        Self {
            workspace,
            settings,
            notifier,
            discovery,
            channels,
            state: Arc::new(RwLock::new(None)),
            busy: AtomicBool::new(false),
        }
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    /// Snapshot of the managed server, if any. Stale the instant it is
    /// returned; re-check before acting on it destructively.
    pub async fn status(&self) -> Option<ManagedServer> {
        self.state.read().await.clone()
    }

    /// Refresh the activity timestamp; a no-op when nothing is managed.
    pub async fn record_activity(&self) {
        if let Some(server) = self.state.write().await.as_mut() {
            server.last_activity = tokio::time::Instant::now();
        }
    }

    /// Drop the managed reference without any termination attempt. Used
    /// when an external actor already destroyed the process and the
    /// session merely needs to stop believing it exists.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let _guard = self.begin_op()?;
        self.start_inner().await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        let _guard = self.begin_op()?;
        self.stop_inner().await
    }

    /// Strictly sequential stop, settle, start — every step fully awaited
    /// under one in-flight guard, so the old and new server can never
    /// overlap on the port.
    pub async fn restart(&self) -> Result<(), SessionError> {
        let _guard = self.begin_op()?;
        self.stop_inner().await?;
        tokio::time::sleep(RESTART_SETTLE_DELAY).await;
        self.start_inner().await
    }

    fn begin_op(&self) -> Result<OpGuard<'_>, SessionError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(OpGuard(&self.busy))
        } else {
            Err(SessionError::Busy)
        }
    }

    async fn start_inner(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            if let Some(server) = state.as_ref() {
                if sys::is_pid_alive(server.pid) {
                    return Err(SessionError::AlreadyRunning);
                }
                // Leftover reference to a process that died without us
                // noticing; clear it rather than refusing to start.
                self.channels
                    .append(
                        CHANNEL_DEBUG,
                        &format!("clearing stale reference to dead pid {}", server.pid),
                    )
                    .await;
                *state = None;
            }
        }

        if !self.workspace.join(pm::PROJECT_MARKER).exists() {
            return Err(SessionError::NotAProject(self.workspace.clone()));
        }

        let path_var = self.settings.path_var();
        let preferred = self
            .settings
            .package_manager
            .as_deref()
            .map(sanitize::validate_package_manager)
            .transpose()?;
        let resolution = pm::detect(&self.workspace, preferred, &path_var);
        for warning in &resolution.warnings {
            self.notifier.warn(warning);
        }

        let script = sanitize::validate_script_token(&self.settings.dev_script)?;

        // Explicit argv, no shell anywhere in between.
        let mut child = Command::new(&resolution.binary)
            .args(resolution.manager.run_args(script))
            .current_dir(&self.workspace)
            .env("PATH", &path_var)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let Some(pid) = child.id() else {
            return Err(SessionError::ExitedEarly);
        };

        let (port_tx, port_rx) = watch::channel(None);
        if let Some(stdout) = child.stdout.take() {
            logs::spawn_output_copier(stdout, Arc::clone(&self.channels), port_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            logs::spawn_output_copier(stderr, Arc::clone(&self.channels), port_tx);
        }

        // Race the socket probe against the start timeout. A slow start is
        // not a failure: at the timeout we commit the best guess (stdout
        // parse, else the configured default) as a provisional port.
        let start_timeout = Duration::from_secs(self.settings.start_timeout_secs);
        let outcome = tokio::time::timeout(start_timeout, async {
            loop {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(status);
                }
                if let Ok(Some(port)) = self.discovery.confirm_listening(pid).await {
                    return Ok(port);
                }
                tokio::time::sleep(PORT_PROBE_INTERVAL).await;
            }
        })
        .await;

        let (port, port_confirmed) = match outcome {
            Ok(Ok(port)) => (port, true),
            Ok(Err(status)) => {
                self.channels
                    .append(
                        CHANNEL_SERVER,
                        &format!("dev server exited during startup ({status})"),
                    )
                    .await;
                return Err(SessionError::ExitedEarly);
            }
            Err(_elapsed) => {
                let guess = *port_rx.borrow();
                (guess.unwrap_or(self.settings.default_port), false)
            }
        };

        let url = format!("http://localhost:{port}");
        let now = tokio::time::Instant::now();
        *self.state.write().await = Some(ManagedServer {
            pid,
            working_directory: self.workspace.clone(),
            port,
            url: url.clone(),
            port_confirmed,
            started_at: now,
            last_activity: now,
        });

        self.spawn_exit_monitor(child, pid);

        if port_confirmed {
            self.notifier
                .info(&format!("dev server running at {url} (pid {pid})"));
        } else {
            self.notifier.info(&format!(
                "dev server starting, assuming {url} (pid {pid}, port not yet confirmed)"
            ));
        }
        Ok(())
    }

    /// The only path out of a running state besides an explicit stop:
    /// when the child exits on its own, clear the reference and leave a
    /// log line behind.
    fn spawn_exit_monitor(&self, mut child: tokio::process::Child, pid: u32) {
        let state = Arc::clone(&self.state);
        let channels = Arc::clone(&self.channels);
        tokio::spawn(async move {
            let status = child.wait().await;
            let mut state = state.write().await;
            // The reference may already point at a replacement server
            if state.as_ref().is_some_and(|s| s.pid == pid) {
                *state = None;
                let line = match status.ok().and_then(|s| s.code()) {
                    Some(code) => format!("dev server (pid {pid}) exited with code {code}"),
                    None => format!("dev server (pid {pid}) was terminated by a signal"),
                };
                channels.append(CHANNEL_SERVER, &line).await;
            }
        });
    }

    async fn stop_inner(&self) -> Result<(), SessionError> {
        let (pid, cwd) = {
            let state = self.state.read().await;
            let Some(server) = state.as_ref() else {
                return Err(SessionError::NotRunning);
            };
            (server.pid, server.working_directory.clone())
        };

        let graceful = Duration::from_millis(self.settings.graceful_shutdown_ms);

        // The package-manager shell can leave siblings in the same
        // directory that the tracked pid does not parent; sweep instances
        // by working directory first. Records are snapshots, so liveness
        // is re-checked right before each signal.
        let home = dirs::home_dir().map(|p| p.to_string_lossy().into_owned());
        let cwd_display = discover::shorten_home(&cwd.to_string_lossy(), home.as_deref());
        for record in self.discovery.running_instances().await {
            if record.working_directory == cwd_display && sys::is_pid_alive(record.pid) {
                terminate::terminate_gracefully(record.pid, graceful).await;
            }
        }

        terminate::terminate_tree(pid).await;

        if !terminate::verify_gone(pid, graceful).await {
            // Best-effort: clearing an unverified reference beats tracking
            // a possible zombie; "list and kill" catches true survivors.
            self.channels
                .append(
                    CHANNEL_DEBUG,
                    &format!("termination of pid {pid} not confirmed within budget"),
                )
                .await;
            self.notifier.warn(&format!(
                "could not confirm dev server (pid {pid}) terminated; clearing it anyway"
            ));
        }

        *self.state.write().await = None;
        self.notifier.info("dev server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
