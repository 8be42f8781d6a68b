//! Centralized path resolution for sigbridge.
//!
//! Single source of truth for the bridge data directory, the log file,
//! and the candidate signald socket locations. Respects SIGBRIDGE_DIR
//! for dev/test sandboxes, falls back to ~/.sigbridge.

use std::path::PathBuf;

/// Get the bridge base directory (SIGBRIDGE_DIR env var or ~/.sigbridge).
pub fn bridge_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SIGBRIDGE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sigbridge")
}

/// Get the log file path (bridge_dir/logs/sigbridge.log)
pub fn log_path() -> PathBuf {
    bridge_dir().join("logs").join("sigbridge.log")
}

/// Candidate signald socket locations, most specific first.
///
/// signald installs differ: system packages bind /var/run, user installs
/// bind under $XDG_RUNTIME_DIR, and older builds used ~/.config. All
/// candidates are raced at connect time; an explicit override from the
/// account options replaces the whole list.
pub fn socket_candidates(explicit: Option<&str>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_empty() {
            return vec![PathBuf::from(path)];
        }
    }

    let mut candidates = Vec::new();
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            candidates.push(PathBuf::from(runtime_dir).join("signald").join("signald.sock"));
        }
    }
    candidates.push(PathBuf::from("/var/run/signald/signald.sock"));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("signald").join("signald.sock"));
    }
    candidates
}
