use crate::session::ServerSession;
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Churn that says nothing about the developer actually working.
pub const DEFAULT_IGNORES: [&str; 4] = ["node_modules", ".git", ".evidence", "dist"];

// ---------------------------------------------------------------------------
// Ignore matching
// ---------------------------------------------------------------------------

fn should_ignore(path: &Path, ignore_patterns: &[&str]) -> bool {
    for pattern in ignore_patterns {
        for component in path.components() {
            if let std::path::Component::Normal(name) = component
                && name.to_string_lossy() == *pattern
            {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Watcher task
// ---------------------------------------------------------------------------

/// Watch the workspace and feed debounced file activity into the
/// session's activity timestamp, which the idle-timeout policy reads.
pub fn spawn_activity_watcher(
    workspace: PathBuf,
    session: Arc<ServerSession>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);

        let event_tx = tx.clone();
        let mut watcher = match notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("failed to create activity watcher: {e}");
                return;
            }
        };

        if let Err(e) = watcher.watch(&workspace, RecursiveMode::Recursive) {
            eprintln!(
                "failed to watch workspace '{}': {}",
                workspace.display(),
                e
            );
            return;
        }

        loop {
            // Wait for first event or shutdown
            let first_event = tokio::select! {
                event = rx.recv() => match event {
                    Some(e) => e,
                    None => return,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            };

            let mut has_relevant = first_event
                .paths
                .iter()
                .any(|p| !should_ignore(p, &DEFAULT_IGNORES));

            // Debounce: wait, then drain whatever piled up
            tokio::select! {
                _ = tokio::time::sleep(DEBOUNCE_DURATION) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }

            while let Ok(event) = rx.try_recv() {
                if !has_relevant {
                    has_relevant = event
                        .paths
                        .iter()
                        .any(|p| !should_ignore(p, &DEFAULT_IGNORES));
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }

            if has_relevant {
                session.record_activity().await;
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore_node_modules() {
        let path = Path::new("/work/site/node_modules/foo/bar.js");
        assert!(should_ignore(path, &DEFAULT_IGNORES));
    }

    #[test]
    fn test_should_ignore_git() {
        let path = Path::new("/work/site/.git/HEAD");
        assert!(should_ignore(path, &DEFAULT_IGNORES));
    }

    #[test]
    fn test_should_not_ignore_source() {
        let path = Path::new("/work/site/pages/index.md");
        assert!(!should_ignore(path, &DEFAULT_IGNORES));
    }

    #[test]
    fn test_should_ignore_empty_patterns() {
        let path = Path::new("/work/site/node_modules/foo.js");
        assert!(!should_ignore(path, &[]));
    }
}
