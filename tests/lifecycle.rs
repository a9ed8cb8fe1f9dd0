use devsitter::config::Settings;
use devsitter::discover::Discovery;
use devsitter::logs::LogChannels;
use devsitter::notifier::Notifier;
use devsitter::paths::Paths;
use devsitter::session::{ServerSession, SessionError};
use devsitter::{sys, terminate};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Fake dev server: prints a local URL like the real one, then sleeps.
const FAKE_SERVER: &str = "#!/bin/sh\nPATH=\"$PATH:/usr/bin:/bin\"\necho \"  Local: http://localhost:4123/\"\nexec sleep 30\n";

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<(String, String)>>);

impl RecordingNotifier {
    fn messages(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.0
            .lock()
            .unwrap()
            .push(("info".to_string(), message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.0
            .lock()
            .unwrap()
            .push(("warn".to_string(), message.to_string()));
    }

    fn error(&self, message: &str) {
        self.0
            .lock()
            .unwrap()
            .push(("error".to_string(), message.to_string()));
    }
}

struct Fixture {
    _dir: TempDir,
    workspace: PathBuf,
    notifier: Arc<RecordingNotifier>,
    session: Arc<ServerSession>,
}

fn write_bin(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A workspace with a package.json, a private PATH holding a fake `npm`,
/// and a session wired against both. Tight timeouts keep the tests quick.
fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("site");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(
        workspace.join("package.json"),
        r#"{ "name": "site", "scripts": { "dev": "evidence dev" } }"#,
    )
    .unwrap();

    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    write_bin(&bin_dir, "npm", FAKE_SERVER);

    let settings = Settings {
        path: Some(bin_dir.to_str().unwrap().to_string()),
        start_timeout_secs: 2,
        graceful_shutdown_ms: 2000,
        ..Settings::default()
    };

    let notifier = Arc::new(RecordingNotifier::default());
    let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
    let channels = Arc::new(LogChannels::new(Paths::with_base(dir.path().join("data"))));
    let discovery = Arc::new(Discovery::new(Arc::clone(&notifier_dyn)));
    let session = Arc::new(ServerSession::new(
        workspace.clone(),
        settings,
        notifier_dyn,
        discovery,
        channels,
    ));

    Fixture {
        _dir: dir,
        workspace,
        notifier,
        session,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_learns_port_from_stdout() {
    let fx = fixture();
    fx.session.start().await.unwrap();

    let server = fx.session.status().await.expect("server committed");
    assert!(sys::is_pid_alive(server.pid));
    // The fake server never opens a socket, so the probe cannot confirm;
    // the stdout-parsed port is committed as provisional.
    assert_eq!(server.port, 4123);
    assert!(!server.port_confirmed);
    assert_eq!(server.url, "http://localhost:4123");
    assert_eq!(server.working_directory, fx.workspace);

    fx.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let fx = fixture();
    fx.session.start().await.unwrap();
    let first_pid = fx.session.status().await.unwrap().pid;

    assert!(matches!(
        fx.session.start().await,
        Err(SessionError::AlreadyRunning)
    ));

    // Exactly one live managed process, the original one
    let server = fx.session.status().await.unwrap();
    assert_eq!(server.pid, first_pid);
    assert!(sys::is_pid_alive(first_pid));

    fx.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_kills_the_process_and_clears_state() {
    let fx = fixture();
    fx.session.start().await.unwrap();
    let pid = fx.session.status().await.unwrap().pid;

    fx.session.stop().await.unwrap();

    assert!(terminate::verify_gone(pid, Duration::from_secs(5)).await);
    assert!(fx.session.status().await.is_none());
}

#[tokio::test]
async fn test_restart_swaps_processes_without_overlap() {
    let fx = fixture();
    fx.session.start().await.unwrap();
    let old_pid = fx.session.status().await.unwrap().pid;

    fx.session.restart().await.unwrap();

    let new_pid = fx.session.status().await.unwrap().pid;
    assert_ne!(old_pid, new_pid);
    // The old process was fully gone before the new one started
    assert!(!sys::is_pid_alive(old_pid));
    assert!(sys::is_pid_alive(new_pid));

    fx.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_after_external_kill_leaves_clean_state() {
    let fx = fixture();
    fx.session.start().await.unwrap();
    let pid = fx.session.status().await.unwrap().pid;

    // Someone else destroys the process behind our back
    sys::force_kill(pid).unwrap();

    // Depending on whether the exit monitor noticed first, stop() either
    // walks its no-op-success path or reports NotRunning; in both cases
    // the session ends up empty with the process gone.
    let result = fx.session.stop().await;
    assert!(matches!(result, Ok(()) | Err(SessionError::NotRunning)));
    assert!(fx.session.status().await.is_none());
    assert!(terminate::verify_gone(pid, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_exit_monitor_clears_state_when_server_dies() {
    let fx = fixture();
    fx.session.start().await.unwrap();
    let pid = fx.session.status().await.unwrap().pid;

    sys::force_kill(pid).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while fx.session.status().await.is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "state not cleared after process death"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_lock_file_without_binary_falls_back_to_npm_with_warning() {
    let fx = fixture();
    // yarn.lock implies yarn, but the private PATH only carries npm
    std::fs::write(fx.workspace.join("yarn.lock"), "").unwrap();

    fx.session.start().await.unwrap();

    let server = fx.session.status().await.expect("started via npm fallback");
    assert!(sys::is_pid_alive(server.pid));
    assert_eq!(server.port, 4123);

    let warnings: Vec<String> = fx
        .notifier
        .messages()
        .into_iter()
        .filter(|(kind, _)| kind == "warn")
        .map(|(_, message)| message)
        .collect();
    assert!(
        warnings.iter().any(|w| w.contains("yarn")),
        "expected a skip warning about yarn, got: {warnings:?}"
    );

    fx.session.stop().await.unwrap();
}

fn lsof_available() -> bool {
    std::process::Command::new("lsof")
        .arg("-v")
        .output()
        .is_ok()
}

#[tokio::test]
async fn test_discovery_sees_signature_match_but_filters_non_listeners() {
    // A process whose command line carries the server signature without
    // ever opening a socket, like a build step would.
    let mut child = tokio::process::Command::new("sh")
        .args(["-c", "sleep 30", "evidence", "dev"])
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();

    let discovery = Discovery::new(Arc::new(RecordingNotifier::default()));
    let candidates = discovery.list_candidates().await.unwrap();
    assert!(
        candidates.iter().any(|(p, _)| *p == pid),
        "candidate listing should pick up the signature match"
    );

    // With the socket probe available, the non-listener must not survive
    // into the confirmed snapshot.
    if lsof_available() {
        let records = discovery.running_instances().await;
        assert!(!records.iter().any(|r| r.pid == pid));
    }

    child.kill().await.unwrap();
    let _ = child.wait().await;
}

#[tokio::test]
async fn test_confirm_listening_finds_a_real_socket() {
    if !lsof_available() {
        return;
    }

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let discovery = Discovery::new(Arc::new(RecordingNotifier::default()));
    let found = discovery
        .confirm_listening(std::process::id())
        .await
        .unwrap();
    assert_eq!(found, Some(port));
}

#[tokio::test]
async fn test_invalid_dev_script_is_rejected_before_spawn() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("site");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("package.json"), "{}").unwrap();
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    write_bin(&bin_dir, "npm", FAKE_SERVER);

    let settings = Settings {
        path: Some(bin_dir.to_str().unwrap().to_string()),
        dev_script: "dev; rm -rf /".to_string(),
        start_timeout_secs: 2,
        ..Settings::default()
    };
    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
    let channels = Arc::new(LogChannels::new(Paths::with_base(dir.path().join("data"))));
    let discovery = Arc::new(Discovery::new(Arc::clone(&notifier)));
    let session = ServerSession::new(workspace, settings, notifier, discovery, channels);

    assert!(matches!(
        session.start().await,
        Err(SessionError::InvalidConfiguration(_))
    ));
    assert!(session.status().await.is_none());
}
