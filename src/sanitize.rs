use crate::pm::PackageManager;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on a validated script token.
pub const MAX_TOKEN_LEN: usize = 100;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum InvalidInput {
    #[error("invalid pid: {0:?}")]
    Pid(String),
    #[error("invalid script token: {0:?}")]
    Token(String),
    #[error("unknown package manager: {0:?}")]
    PackageManager(String),
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Accepts only a base-10 positive integer with no sign, whitespace or
/// other decoration. Every pid that ends up in a subprocess argument or a
/// liveness probe goes through here first, including pids parsed back out
/// of tool output.
pub fn validate_pid(input: &str) -> Result<u32, InvalidInput> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidInput::Pid(input.to_string()));
    }
    match input.parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(InvalidInput::Pid(input.to_string())),
    }
}

/// Restrictive allow-list for the configurable dev-script name: letters,
/// digits, dash, underscore, colon, length 1..=MAX_TOKEN_LEN.
pub fn validate_script_token(input: &str) -> Result<&str, InvalidInput> {
    let ok = !input.is_empty()
        && input.len() <= MAX_TOKEN_LEN
        && input
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':'));
    if ok {
        Ok(input)
    } else {
        Err(InvalidInput::Token(input.to_string()))
    }
}

/// Closed set of supported package managers.
pub fn validate_package_manager(input: &str) -> Result<PackageManager, InvalidInput> {
    PackageManager::from_str(input).map_err(|_| InvalidInput::PackageManager(input.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
