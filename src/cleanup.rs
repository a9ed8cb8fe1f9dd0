use crate::config::CleanupConfig;
use crate::discover::Discovery;
use crate::notifier::Notifier;
use crate::session::ServerSession;
use crate::sys;
use crate::terminate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// StopReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    RuntimeExceeded,
    IdleExceeded,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::RuntimeExceeded => write!(f, "maximum runtime reached"),
            StopReason::IdleExceeded => write!(f, "idle timeout reached"),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy decisions (pure)
// ---------------------------------------------------------------------------

/// Decide whether the managed server should be stopped. Runtime is checked
/// before idle; a zero threshold disables its check.
pub fn stop_reason(
    elapsed: Duration,
    idle: Duration,
    config: &CleanupConfig,
) -> Option<StopReason> {
    if config.max_runtime_minutes > 0
        && elapsed >= Duration::from_secs(config.max_runtime_minutes * 60)
    {
        return Some(StopReason::RuntimeExceeded);
    }
    if config.idle_minutes > 0 && idle >= Duration::from_secs(config.idle_minutes * 60) {
        return Some(StopReason::IdleExceeded);
    }
    None
}

/// Given the pids of non-managed instances, pick the ones to terminate so
/// at most `max_extra` remain. Lowest pids first, as an oldest-first
/// heuristic; zero means unlimited.
pub fn plan_extra_kills(mut extras: Vec<u32>, max_extra: u32) -> Vec<u32> {
    if max_extra == 0 || extras.len() <= max_extra as usize {
        return Vec::new();
    }
    extras.sort_unstable();
    let excess = extras.len() - max_extra as usize;
    extras.truncate(excess);
    extras
}

// ---------------------------------------------------------------------------
// CleanupEngine
// ---------------------------------------------------------------------------

/// Periodically evaluates the auto-stop policies against the session and
/// the discovered instance fleet. Every tick without a managed server is
/// a no-op.
pub struct CleanupEngine {
    session: Arc<ServerSession>,
    discovery: Arc<Discovery>,
    notifier: Arc<dyn Notifier>,
    config: CleanupConfig,
    graceful: Duration,
}

impl CleanupEngine {
    pub fn new(
        session: Arc<ServerSession>,
        discovery: Arc<Discovery>,
        notifier: Arc<dyn Notifier>,
        config: CleanupConfig,
        graceful: Duration,
    ) -> Self {
        Self {
            session,
            discovery,
            notifier,
            config,
            graceful,
        }
    }

    pub fn spawn(
        self,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick of tokio's interval fires immediately; swallow it
            ticker.tick().await;

            let mut warned_extras = false;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                        continue;
                    }
                }
                self.tick(&mut warned_extras).await;
            }
        })
    }

    pub async fn tick(&self, warned_extras: &mut bool) {
        let Some(server) = self.session.status().await else {
            *warned_extras = false;
            return;
        };

        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(server.started_at);
        let idle = now.duration_since(server.last_activity);
        if let Some(reason) = stop_reason(elapsed, idle, &self.config) {
            self.notifier
                .warn(&format!("stopping dev server automatically: {reason}"));
            if let Err(e) = self.session.stop().await {
                // A lifecycle operation may be in flight; the next tick
                // re-evaluates against fresh state.
                eprintln!("auto-stop failed: {e}");
            }
            return;
        }

        if self.config.max_extra_servers == 0 && !self.config.warn_on_extras {
            return;
        }

        let records = self.discovery.running_instances().await;
        let extras: Vec<u32> = records
            .iter()
            .map(|record| record.pid)
            .filter(|pid| *pid != server.pid)
            .collect();
        if extras.is_empty() {
            *warned_extras = false;
            return;
        }

        let doomed = plan_extra_kills(extras.clone(), self.config.max_extra_servers);
        if !doomed.is_empty() {
            for pid in doomed {
                // The snapshot is already stale; re-verify right before
                // the signal.
                if !sys::is_pid_alive(pid) {
                    continue;
                }
                let confirmed = terminate::terminate_gracefully(pid, self.graceful).await;
                if confirmed {
                    self.notifier
                        .info(&format!("terminated extra dev server (pid {pid})"));
                } else {
                    self.notifier.warn(&format!(
                        "asked extra dev server (pid {pid}) to terminate, exit not confirmed"
                    ));
                }
            }
        } else if self.config.warn_on_extras && !*warned_extras {
            *warned_extras = true;
            self.notifier.warn(&format!(
                "{} other dev server(s) running besides the managed one",
                extras.len()
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
