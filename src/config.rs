use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_dev_script() -> String {
    "dev".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_start_timeout_secs() -> u64 {
    30
}

fn default_update_interval_secs() -> u64 {
    30
}

fn default_graceful_shutdown_ms() -> u64 {
    crate::terminate::DEFAULT_GRACEFUL_TIMEOUT_MS
}

fn default_notifications_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// CleanupConfig
// ---------------------------------------------------------------------------

/// Auto-stop policy thresholds. Zero disables the corresponding check
/// (for `max_extra_servers`, zero means unlimited).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub max_runtime_minutes: u64,
    #[serde(default)]
    pub idle_minutes: u64,
    #[serde(default)]
    pub max_extra_servers: u32,
    #[serde(default)]
    pub warn_on_extras: bool,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Package manager to prefer, if its binary resolves.
    pub package_manager: Option<String>,
    /// Package script that launches the dev server.
    #[serde(default = "default_dev_script")]
    pub dev_script: String,
    /// Port assumed when neither output parsing nor socket probing
    /// produced one.
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// How long `start` waits for the listening-socket confirmation.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    /// Cleanup-policy evaluation cadence.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    /// Graceful-termination budget before SIGKILL escalation.
    #[serde(default = "default_graceful_shutdown_ms")]
    pub graceful_shutdown_ms: u64,
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
    /// PATH used for binary resolution and for the spawned server.
    /// Defaults to the process environment; hosts and tests may pin it.
    pub path: Option<String>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package_manager: None,
            dev_script: default_dev_script(),
            default_port: default_port(),
            start_timeout_secs: default_start_timeout_secs(),
            update_interval_secs: default_update_interval_secs(),
            graceful_shutdown_ms: default_graceful_shutdown_ms(),
            notifications_enabled: default_notifications_enabled(),
            path: None,
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Settings {
    /// PATH for resolution and for the child environment.
    pub fn path_var(&self) -> String {
        self.path
            .clone()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_default()
    }
}

/// Load settings from a toml file; a missing file means defaults.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Settings::default());
        }
        Err(e) => return Err(ConfigError::Read(e)),
    };
    Ok(toml::from_str(&content)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
