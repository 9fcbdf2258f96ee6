//! Startup orchestration.
//!
//! # Responsibilities
//! - Prepare the data directory before the dispatcher starts
//! - Open the companion window once the listener is up
//!
//! # Design Decisions
//! - Fail fast: a data directory that cannot be created is fatal
//! - The companion window is best effort; failure is only logged

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::StartupError;

/// Directory name under `$HOME` when no data directory is configured.
pub const DEFAULT_DATA_DIR: &str = ".allproxy";

/// Subdirectories that must exist before traffic is accepted.
pub const DATA_SUBDIRS: [&str; 4] = ["state", "sessions", "certs", "intercept"];

/// The prepared data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// `explicit`, or `$HOME/.allproxy`.
    pub fn resolve(explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR),
        }
    }

    /// Create the root and its fixed subdirectories.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self, StartupError> {
        let root = root.into();
        for sub in DATA_SUBDIRS {
            let path = root.join(sub);
            std::fs::create_dir_all(&path).map_err(|source| StartupError::DataDir { path, source })?;
        }
        tracing::info!(path = ?root, "Data directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where persisted route rules and breakpoints live.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }
}

/// Dashboard URL for a listener address.
pub fn dashboard_url(ssl: bool, host: &str, port: u16) -> String {
    let scheme = if ssl { "https" } else { "http" };
    let host = match host {
        "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    };
    format!("{scheme}://{host}:{port}/")
}

/// Launch the platform opener on `url`.
pub fn open_companion(url: &str) {
    let mut command = opener(url);
    match command.spawn() {
        Ok(_) => tracing::info!(url = %url, "Companion window opened"),
        Err(e) => tracing::warn!(url = %url, error = %e, "Failed to open companion window"),
    }
}

#[cfg(target_os = "macos")]
fn opener(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn opener(url: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_subdirs() {
        let root = std::env::temp_dir().join(format!("capture-proxy-data-{}", uuid::Uuid::new_v4()));
        let data = DataDir::prepare(&root).unwrap();
        for sub in DATA_SUBDIRS {
            assert!(root.join(sub).is_dir());
        }
        assert_eq!(data.state_dir(), root.join("state"));
        // Idempotent.
        DataDir::prepare(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_resolve_explicit() {
        assert_eq!(DataDir::resolve(Some(Path::new("/tmp/x"))), PathBuf::from("/tmp/x"));
        assert!(DataDir::resolve(None).ends_with(DEFAULT_DATA_DIR));
    }

    #[test]
    fn test_dashboard_url() {
        assert_eq!(dashboard_url(false, "0.0.0.0", 8888), "http://localhost:8888/");
        assert_eq!(dashboard_url(true, "proxy.local", 443), "https://proxy.local:443/");
    }
}
