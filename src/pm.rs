use std::path::{Path, PathBuf};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File that marks a directory as a project we are willing to start in.
pub const PROJECT_MARKER: &str = "package.json";

/// Lock-file detection order when no usable manager is configured.
const DETECTION_ORDER: [PackageManager; 3] = [
    PackageManager::Yarn,
    PackageManager::Pnpm,
    PackageManager::Bun,
];

// ---------------------------------------------------------------------------
// PackageManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }

    pub fn lock_file(&self) -> &'static str {
        match self {
            PackageManager::Npm => "package-lock.json",
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Pnpm => "pnpm-lock.yaml",
            PackageManager::Bun => "bun.lockb",
        }
    }

    /// Argument list for running a package script, e.g. `npm run dev`.
    pub fn run_args(&self, script: &str) -> Vec<String> {
        vec!["run".to_string(), script.to_string()]
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for PackageManager {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(PackageManager::Npm),
            "yarn" => Ok(PackageManager::Yarn),
            "pnpm" => Ok(PackageManager::Pnpm),
            "bun" => Ok(PackageManager::Bun),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Resolution {
    pub manager: PackageManager,
    /// Resolved binary path, or the bare name if resolution failed and we
    /// are letting the spawn report the real error.
    pub binary: PathBuf,
    /// Human-readable notes about managers that were skipped along the way.
    pub warnings: Vec<String>,
}

/// Pick a package manager for `project_dir`.
///
/// A configured preference wins only if its binary actually resolves on
/// `path_var`. Otherwise lock files are consulted in priority order, and a
/// lock file whose manager is not installed is skipped with a warning
/// rather than treated as fatal. npm is the final fallback.
pub fn detect(
    project_dir: &Path,
    preferred: Option<PackageManager>,
    path_var: &str,
) -> Resolution {
    let mut warnings = Vec::new();

    if let Some(preferred) = preferred {
        if let Some(binary) = resolve_binary(preferred.binary(), path_var) {
            return Resolution {
                manager: preferred,
                binary,
                warnings,
            };
        }
        warnings.push(format!(
            "configured package manager '{preferred}' is not on PATH, detecting from lock files"
        ));
    }

    for candidate in DETECTION_ORDER {
        if !project_dir.join(candidate.lock_file()).exists() {
            continue;
        }
        match resolve_binary(candidate.binary(), path_var) {
            Some(binary) => {
                return Resolution {
                    manager: candidate,
                    binary,
                    warnings,
                };
            }
            None => {
                warnings.push(format!(
                    "{} implies '{candidate}' but its binary is not installed, skipping",
                    candidate.lock_file()
                ));
            }
        }
    }

    let manager = PackageManager::Npm;
    let binary = match resolve_binary(manager.binary(), path_var) {
        Some(binary) => binary,
        None => {
            warnings.push("npm not found on PATH, spawn will likely fail".to_string());
            PathBuf::from(manager.binary())
        }
    };
    Resolution {
        manager,
        binary,
        warnings,
    }
}

/// Walk the PATH entries looking for an executable regular file.
pub fn resolve_binary(name: &str, path_var: &str) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_bin(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_resolve_binary_found() {
        let bin_dir = tempfile::tempdir().unwrap();
        let expected = fake_bin(bin_dir.path(), "yarn");
        let path_var = bin_dir.path().to_str().unwrap().to_string();
        assert_eq!(resolve_binary("yarn", &path_var), Some(expected));
    }

    #[test]
    fn test_resolve_binary_missing() {
        let bin_dir = tempfile::tempdir().unwrap();
        let path_var = bin_dir.path().to_str().unwrap().to_string();
        assert_eq!(resolve_binary("yarn", &path_var), None);
    }

    #[test]
    fn test_resolve_binary_ignores_non_executable() {
        let bin_dir = tempfile::tempdir().unwrap();
        let path = bin_dir.path().join("yarn");
        std::fs::write(&path, "not a program").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let path_var = bin_dir.path().to_str().unwrap().to_string();
        assert_eq!(resolve_binary("yarn", &path_var), None);
    }

    #[test]
    fn test_detect_prefers_configured_manager_when_present() {
        let project = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        fake_bin(bin_dir.path(), "pnpm");
        fake_bin(bin_dir.path(), "npm");
        let path_var = bin_dir.path().to_str().unwrap().to_string();

        let resolution = detect(project.path(), Some(PackageManager::Pnpm), &path_var);
        assert_eq!(resolution.manager, PackageManager::Pnpm);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_detect_lock_file_priority() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("yarn.lock"), "").unwrap();
        std::fs::write(project.path().join("pnpm-lock.yaml"), "").unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        fake_bin(bin_dir.path(), "yarn");
        fake_bin(bin_dir.path(), "pnpm");
        let path_var = bin_dir.path().to_str().unwrap().to_string();

        let resolution = detect(project.path(), None, &path_var);
        assert_eq!(resolution.manager, PackageManager::Yarn);
    }

    #[test]
    fn test_detect_skips_lock_file_without_binary() {
        // yarn.lock present but only npm is installed: warn and fall through
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("yarn.lock"), "").unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        fake_bin(bin_dir.path(), "npm");
        let path_var = bin_dir.path().to_str().unwrap().to_string();

        let resolution = detect(project.path(), None, &path_var);
        assert_eq!(resolution.manager, PackageManager::Npm);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("yarn"));
    }

    #[test]
    fn test_detect_unavailable_preference_falls_back_with_warning() {
        let project = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        fake_bin(bin_dir.path(), "npm");
        let path_var = bin_dir.path().to_str().unwrap().to_string();

        let resolution = detect(project.path(), Some(PackageManager::Bun), &path_var);
        assert_eq!(resolution.manager, PackageManager::Npm);
        assert!(resolution.warnings.iter().any(|w| w.contains("bun")));
    }

    #[test]
    fn test_detect_no_locks_no_binaries_still_returns_npm() {
        let project = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let path_var = bin_dir.path().to_str().unwrap().to_string();

        let resolution = detect(project.path(), None, &path_var);
        assert_eq!(resolution.manager, PackageManager::Npm);
        assert_eq!(resolution.binary, PathBuf::from("npm"));
        assert!(!resolution.warnings.is_empty());
    }

    #[test]
    fn test_run_args() {
        assert_eq!(PackageManager::Npm.run_args("dev"), vec!["run", "dev"]);
        assert_eq!(
            PackageManager::Yarn.run_args("dev:watch"),
            vec!["run", "dev:watch"]
        );
    }
}
