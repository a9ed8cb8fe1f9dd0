use clap::{CommandFactory, Parser};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use devsitter::activity::spawn_activity_watcher;
use devsitter::cleanup::CleanupEngine;
use devsitter::cli::{Cli, Command};
use devsitter::config::{Settings, load_settings};
use devsitter::discover::Discovery;
use devsitter::logs::{CHANNEL_INSTANCES, LogChannels};
use devsitter::notifier::{Notifier, TerminalNotifier};
use devsitter::sanitize;
use devsitter::session::{ServerSession, SessionError};
use devsitter::terminate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let cwd = std::env::current_dir()?;
    let settings = load_settings(&cwd.join("devsitter.toml"))
        .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;

    let paths = devsitter::paths::Paths::new()?;
    let notifier: Arc<dyn Notifier> =
        Arc::new(TerminalNotifier::new(settings.notifications_enabled));
    let discovery = Arc::new(Discovery::new(Arc::clone(&notifier)));
    let channels = Arc::new(LogChannels::new(paths));

    match command {
        Command::Run => run(cwd, settings, notifier, discovery, channels).await?,
        Command::List => list(&discovery, &channels, cli.json).await,
        Command::Kill { pids } => kill(&pids, &settings, &notifier).await,
        Command::KillAll => kill_all(&discovery, &settings, &notifier, &channels).await,
    }

    Ok(())
}

/// Start the dev server and supervise it until it exits or the user
/// interrupts us.
async fn run(
    workspace: std::path::PathBuf,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    discovery: Arc<Discovery>,
    channels: Arc<LogChannels>,
) -> color_eyre::Result<()> {
    let session = Arc::new(ServerSession::new(
        workspace.clone(),
        settings.clone(),
        Arc::clone(&notifier),
        Arc::clone(&discovery),
        channels,
    ));

    session
        .start()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_activity_watcher(workspace, Arc::clone(&session), shutdown_rx.clone());
    CleanupEngine::new(
        Arc::clone(&session),
        discovery,
        Arc::clone(&notifier),
        settings.cleanup.clone(),
        Duration::from_millis(settings.graceful_shutdown_ms),
    )
    .spawn(
        Duration::from_secs(settings.update_interval_secs),
        shutdown_rx,
    );

    tokio::select! {
        _ = devsitter::sys::signal_shutdown() => {
            let _ = shutdown_tx.send(true);
            match session.stop().await {
                Ok(()) | Err(SessionError::NotRunning) => {}
                Err(e) => notifier.error(&format!("shutdown failed: {e}")),
            }
        }
        _ = wait_until_cleared(&session) => {
            // The server exited (or a policy stopped it); nothing left to do
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}

async fn wait_until_cleared(session: &ServerSession) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if session.status().await.is_none() {
            return;
        }
    }
}

async fn list(discovery: &Discovery, channels: &LogChannels, json: bool) {
    let records = discovery.running_instances().await;
    channels
        .append(
            CHANNEL_INSTANCES,
            &format!("listed {} running instance(s)", records.len()),
        )
        .await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).expect("records serialize")
        );
        return;
    }

    if records.is_empty() {
        println!("no dev servers running");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["PID", "PORT", "DIRECTORY", "COMMAND"]);
    for record in &records {
        table.add_row([
            record.pid.to_string(),
            record
                .listening_port
                .map(|p| p.to_string())
                .unwrap_or_default(),
            record.working_directory.clone(),
            record.command_line.clone(),
        ]);
    }
    println!("{table}");
}

/// Bulk kill by pid: one bad member never aborts the batch; the outcome
/// is an aggregate count.
async fn kill(pids: &[String], settings: &Settings, notifier: &Arc<dyn Notifier>) {
    let graceful = Duration::from_millis(settings.graceful_shutdown_ms);
    let total = pids.len();
    let mut killed = 0usize;

    for raw in pids {
        match sanitize::validate_pid(raw) {
            Ok(pid) => {
                if terminate::terminate_gracefully(pid, graceful).await {
                    killed += 1;
                } else {
                    notifier.warn(&format!("pid {pid} did not exit within the budget"));
                }
            }
            Err(e) => notifier.error(&e.to_string()),
        }
    }

    println!("killed {killed} of {total}");
}

async fn kill_all(
    discovery: &Discovery,
    settings: &Settings,
    notifier: &Arc<dyn Notifier>,
    channels: &LogChannels,
) {
    let graceful = Duration::from_millis(settings.graceful_shutdown_ms);
    let records = discovery.running_instances().await;
    let total = records.len();
    let mut killed = 0usize;

    for record in records {
        // Snapshot entries can die between discovery and now
        if !devsitter::sys::is_pid_alive(record.pid) {
            killed += 1;
            continue;
        }
        if terminate::terminate_gracefully(record.pid, graceful).await {
            killed += 1;
        } else {
            notifier.warn(&format!(
                "pid {} did not exit within the budget",
                record.pid
            ));
        }
    }

    channels
        .append(
            CHANNEL_INSTANCES,
            &format!("kill-all terminated {killed} of {total}"),
        )
        .await;
    println!("killed {killed} of {total}");
}
