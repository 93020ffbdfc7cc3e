//! vc-server: vibecraft session server.
//!
//! Keeps coding agents running inside detachable tmux sessions, streams
//! their terminals to any number of WebSocket viewers and replays recent
//! output to late joiners.

mod config;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::VcServer;
use session::IdlePolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// vibecraft session server
#[derive(Parser, Debug)]
#[command(name = "vc-server", version, about = "vibecraft session server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.vibecraft/config.toml")]
    config: String,

    /// Command launched inside new host sessions
    #[arg(long)]
    agent_command: Option<String>,

    /// What to do when the last viewer leaves (keep-streaming, detach)
    #[arg(long)]
    idle_policy: Option<IdlePolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting vc-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        agent_command: cli.agent_command,
        idle_policy: cli.idle_policy,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        addr = %server_config.listen_addr(),
        multiplexer = %server_config.multiplexer,
        idle_policy = ?server_config.sessions.idle_policy,
        "configuration loaded"
    );

    let vc_server = Arc::new(VcServer::new(server_config));

    tokio::select! {
        result = vc_server.clone().run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                vc_server.sessions().shutdown().await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    // Host sessions outlive the server; only attachments and shells go.
    let closed = vc_server.sessions().shutdown().await;
    info!(sessions = closed, "vc-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
