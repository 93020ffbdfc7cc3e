//! Server configuration: TOML file + CLI overrides.

use crate::session::env::{augmented_path, expand_tilde};
use crate::session::manager::{DEFAULT_COLS, DEFAULT_HOST_PREFIX, DEFAULT_ROWS};
use crate::session::ring_buffer::DEFAULT_BUFFER_CHUNKS;
use crate::session::{IdlePolicy, SessionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use vc_core::{VcError, VcResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between host health sweeps; 0 disables them.
    #[serde(default = "default_health_interval")]
    pub health_interval: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            health_interval: default_health_interval(),
        }
    }
}

/// `[sessions]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_host_prefix")]
    pub host_prefix: String,
    #[serde(default = "default_multiplexer")]
    pub multiplexer: String,
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_extra_path")]
    pub extra_path: Vec<String>,
    #[serde(default)]
    pub idle_policy: IdlePolicy,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            buffer_chunks: default_buffer_chunks(),
            cols: default_cols(),
            rows: default_rows(),
            host_prefix: default_host_prefix(),
            multiplexer: default_multiplexer(),
            agent_command: default_agent_command(),
            shell: None,
            extra_path: default_extra_path(),
            idle_policy: IdlePolicy::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4003
}
fn default_health_interval() -> u64 {
    30
}
fn default_buffer_chunks() -> usize {
    DEFAULT_BUFFER_CHUNKS
}
fn default_cols() -> u16 {
    DEFAULT_COLS
}
fn default_rows() -> u16 {
    DEFAULT_ROWS
}
fn default_host_prefix() -> String {
    DEFAULT_HOST_PREFIX.to_string()
}
fn default_multiplexer() -> String {
    "tmux".to_string()
}
fn default_agent_command() -> String {
    "claude".to_string()
}
fn default_extra_path() -> Vec<String> {
    vec![
        "~/.local/bin".to_string(),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "~/.cargo/bin".to_string(),
    ]
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub agent_command: Option<String>,
    pub idle_policy: Option<IdlePolicy>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub health_interval: u64,
    pub multiplexer: String,
    pub sessions: SessionConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> VcResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(&path.to_string_lossy());
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file_config, cli))
    }

    /// Merge a parsed file with CLI overrides.
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> Self {
        let extra: Vec<PathBuf> = file
            .sessions
            .extra_path
            .iter()
            .map(|p| expand_tilde(p))
            .collect();

        Self {
            bind: cli.bind.unwrap_or(file.server.bind),
            port: cli.port.unwrap_or(file.server.port),
            health_interval: file.server.health_interval,
            multiplexer: file.sessions.multiplexer,
            sessions: SessionConfig {
                buffer_chunks: file.sessions.buffer_chunks,
                cols: file.sessions.cols,
                rows: file.sessions.rows,
                host_prefix: file.sessions.host_prefix,
                agent_command: cli
                    .agent_command
                    .unwrap_or(file.sessions.agent_command),
                shell: file.sessions.shell,
                path: augmented_path(&extra),
                idle_policy: cli.idle_policy.unwrap_or(file.sessions.idle_policy),
            },
        }
    }

    /// `bind:port` as a socket address string.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse(content: &str) -> VcResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| VcError::Config(format!("config parse error: {e}")))
}
