//! Detachable host sessions.
//!
//! A host session is a process group owned by a terminal multiplexer
//! (tmux by default). It keeps the agent running independently of any
//! attachment, so the server can detach, crash or restart without losing
//! the work inside it.

use super::env::{shell_quote, SCRUBBED_VARS};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};
use vc_core::{VcError, VcResult};

/// Everything needed to start a new host session.
#[derive(Debug, Clone)]
pub struct HostLaunch<'a> {
    pub name: &'a str,
    pub cwd: &'a Path,
    /// Program (optionally with leading fixed arguments) run inside the host.
    pub command: &'a str,
    /// Extra arguments appended after `command`.
    pub args: &'a [String],
    pub cols: u16,
    pub rows: u16,
    /// Search path exported to the hosted program.
    pub path: &'a str,
}

/// A multiplexer able to create, probe and tear down host sessions.
pub trait SessionHost: Send + Sync {
    /// Start a new detached host session. Fails with [`VcError::Launch`]
    /// when the multiplexer cannot be spawned or refuses the session.
    fn create(&self, launch: &HostLaunch<'_>) -> VcResult<()>;

    /// Whether a host session with this name is currently running.
    fn exists(&self, name: &str) -> bool;

    /// Terminate a host session.
    fn kill(&self, name: &str) -> VcResult<()>;

    /// Shell command line that attaches the calling terminal to `name`.
    fn attach_command(&self, name: &str) -> String;

    /// Bytes that make an attached client detach without stopping the host.
    fn detach_sequence(&self) -> &[u8];
}

/// tmux prefix (C-b) followed by `d`.
const TMUX_DETACH: &[u8] = b"\x02d";

/// [`SessionHost`] backed by the tmux binary.
#[derive(Debug, Clone)]
pub struct TmuxHost {
    binary: String,
    /// Search path used to resolve `binary` itself.
    path: String,
}

impl TmuxHost {
    pub fn new(binary: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            path: path.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        for var in SCRUBBED_VARS {
            cmd.env_remove(var);
        }
        cmd.env("PATH", &self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    /// Exact-match target so `vc-ab` never resolves to `vc-abc`.
    fn target(name: &str) -> String {
        format!("={name}")
    }
}

impl SessionHost for TmuxHost {
    fn create(&self, launch: &HostLaunch<'_>) -> VcResult<()> {
        let mut parts = launch.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VcError::Launch("empty agent command".into()))?;

        let mut cmd = self.command();
        cmd.arg("new-session")
            .arg("-d")
            .arg("-s")
            .arg(launch.name)
            .arg("-x")
            .arg(launch.cols.to_string())
            .arg("-y")
            .arg(launch.rows.to_string())
            .arg("-c")
            .arg(launch.cwd)
            // tmux does not forward the client PATH to new panes; pin it with env(1).
            .arg("env")
            .arg(format!("PATH={}", launch.path))
            .arg(program)
            .args(parts)
            .args(launch.args);

        let output = cmd.output().map_err(|e| {
            VcError::Launch(format!(
                "failed to spawn {} for host session {}: {e}",
                self.binary, launch.name
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcError::Launch(format!(
                "{} new-session {} failed: {}",
                self.binary,
                launch.name,
                stderr.trim()
            )));
        }

        info!(host = %launch.name, cwd = %launch.cwd.display(), "host session created");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        match self
            .command()
            .arg("has-session")
            .arg("-t")
            .arg(Self::target(name))
            .status()
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(host = %name, error = %e, "host probe failed");
                false
            }
        }
    }

    fn kill(&self, name: &str) -> VcResult<()> {
        let output = self
            .command()
            .arg("kill-session")
            .arg("-t")
            .arg(Self::target(name))
            .output()
            .map_err(|e| VcError::Host(format!("failed to spawn {}: {e}", self.binary)))?;

        if output.status.success() {
            info!(host = %name, "host session killed");
            Ok(())
        } else {
            Err(VcError::Host(format!(
                "kill-session {name}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn attach_command(&self, name: &str) -> String {
        format!(
            "{} attach-session -t {}",
            shell_quote(&self.binary),
            shell_quote(&Self::target(name))
        )
    }

    fn detach_sequence(&self) -> &[u8] {
        TMUX_DETACH
    }
}
