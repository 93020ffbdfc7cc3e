//! Process environment for host sessions and PTY attachments.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Terminal type advertised to every PTY.
pub const TERM: &str = "xterm-256color";
pub const COLORTERM: &str = "truecolor";

/// Build a search path that starts with `current` and appends every entry of
/// `extra` not already present.
pub fn augmented_path_from(current: Option<OsString>, extra: &[PathBuf]) -> String {
    let mut entries: Vec<PathBuf> = current
        .as_deref()
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();

    for dir in extra {
        if !entries.iter().any(|e| e == dir) {
            entries.push(dir.clone());
        }
    }

    match std::env::join_paths(&entries) {
        Ok(joined) => joined.to_string_lossy().into_owned(),
        // An entry containing the separator cannot be joined; fall back to
        // the inherited value untouched.
        Err(_) => current
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// The inherited `PATH` extended with `extra`.
pub fn augmented_path(extra: &[PathBuf]) -> String {
    augmented_path_from(std::env::var_os("PATH"), extra)
}

/// Variables stripped from every spawned process. A server started from
/// inside tmux would otherwise point its own tmux calls at the outer server
/// and make `attach-session` refuse to nest.
pub const SCRUBBED_VARS: &[&str] = &["TMUX", "TMUX_PANE"];

/// Environment overrides applied to every spawned PTY.
pub fn terminal_env(path: &str) -> Vec<(String, String)> {
    vec![
        ("PATH".to_string(), path.to_string()),
        ("TERM".to_string(), TERM.to_string()),
        ("COLORTERM".to_string(), COLORTERM.to_string()),
    ]
}

pub fn scrubbed_env() -> Vec<String> {
    SCRUBBED_VARS.iter().map(|v| v.to_string()).collect()
}

/// Resolve the user's login shell.
pub fn login_shell(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Quote a single word for a POSIX shell command line.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

/// Home directory, or `/` when it cannot be determined.
pub fn home_or_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| Path::new("/").to_path_buf())
}
