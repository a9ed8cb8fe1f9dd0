use crate::paths::Paths;
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Captured dev-server output.
pub const CHANNEL_SERVER: &str = "server";
/// Instance listings and bulk-kill reports.
pub const CHANNEL_INSTANCES: &str = "instances";
/// Internal diagnostics.
pub const CHANNEL_DEBUG: &str = "debug";

/// Append-only, file-backed log channels. A channel's file handle is opened
/// once and reused across appends; callers share one `LogChannels` rather
/// than opening sinks per call.
pub struct LogChannels {
    paths: Paths,
    files: Mutex<HashMap<String, tokio::fs::File>>,
}

impl LogChannels {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub async fn append(&self, channel: &str, line: &str) {
        if let Err(e) = self.try_append(channel, line).await {
            eprintln!("log append failed on '{channel}': {e}");
        }
    }

    async fn try_append(&self, channel: &str, line: &str) -> io::Result<()> {
        let mut files = self.files.lock().await;
        if !files.contains_key(channel) {
            tokio::fs::create_dir_all(self.paths.log_dir()).await?;
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.paths.channel_log(channel))
                .await?;
            files.insert(channel.to_string(), file);
        }
        let file = files.get_mut(channel).expect("channel file just inserted");
        let stamped = format!("{} {line}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        file.write_all(stamped.as_bytes()).await?;
        file.flush().await
    }
}

// ---------------------------------------------------------------------------
// Port parsing
// ---------------------------------------------------------------------------

/// Best-effort scan of a dev-server output line for a local URL, the
/// `http://localhost:<port>` shape. Parsing alone never decides the final
/// port; a socket probe confirms it.
pub fn parse_local_port(line: &str) -> Option<u16> {
    for prefix in ["http://localhost:", "http://127.0.0.1:"] {
        let Some(idx) = line.find(prefix) else {
            continue;
        };
        let rest = &line[idx + prefix.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(port) = digits.parse::<u16>()
            && port > 0
        {
            return Some(port);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Output copier
// ---------------------------------------------------------------------------

/// Copy a child output stream line-by-line into the server channel,
/// publishing the first local port seen on `port_tx`.
pub fn spawn_output_copier(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    channels: std::sync::Arc<LogChannels>,
    port_tx: tokio::sync::watch::Sender<Option<u16>>,
) {
    tokio::spawn(async move {
        let mut lines = TokioBufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if port_tx.borrow().is_none()
                && let Some(port) = parse_local_port(&line)
            {
                let _ = port_tx.send(Some(port));
            }
            channels.append(CHANNEL_SERVER, &line).await;
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
