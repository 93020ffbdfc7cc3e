//! Core server: accepts viewer connections and dispatches their requests
//! to the session manager.
//!
//! Every connection owns one output sink. Request replies and session
//! broadcasts share that sink, so a connection sees them in the order the
//! manager produced them.

use crate::config::ServerConfig;
use crate::session::{ChannelSink, NativePtySpawner, SessionManager, SinkRef, TmuxHost};
use crate::transport::websocket::{self, Incoming, ViewerSocket};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vc_core::{ClientMessage, ServerMessage, VcError, VcResult};

/// The vibecraft session server.
pub struct VcServer {
    config: ServerConfig,
    sessions: Arc<SessionManager>,
}

impl VcServer {
    /// Create a server backed by tmux and native PTYs.
    pub fn new(config: ServerConfig) -> Self {
        let host = Arc::new(TmuxHost::new(
            config.multiplexer.clone(),
            config.sessions.path.clone(),
        ));
        let manager = SessionManager::new(
            config.sessions.clone(),
            host,
            Arc::new(NativePtySpawner),
        );
        Self::with_manager(config, Arc::new(manager))
    }

    pub fn with_manager(config: ServerConfig, sessions: Arc<SessionManager>) -> Self {
        Self { config, sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Bind the WebSocket listener and serve until the listener closes.
    pub async fn run(self: Arc<Self>) -> VcResult<()> {
        let (addr, viewers) = websocket::listen(&self.config.listen_addr()).await?;
        info!(addr = %addr, "vc-server ready");
        self.serve(viewers).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(
        self: Arc<Self>,
        mut viewers: mpsc::Receiver<ViewerSocket>,
    ) -> VcResult<()> {
        if self.config.health_interval > 0 {
            let sweep = self.sessions.clone();
            let period = Duration::from_secs(self.config.health_interval);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    let removed = sweep.reap().await;
                    if !removed.is_empty() {
                        let remaining = sweep.count().await;
                        info!(count = removed.len(), remaining, "reaped sessions");
                    }
                }
            });
        }

        while let Some(socket) = viewers.recv().await {
            let srv = self.clone();
            tokio::spawn(async move {
                srv.handle_viewer(socket).await;
            });
        }

        info!("listener closed, shutting down");
        Ok(())
    }

    /// Run one connection to completion and release its subscriptions.
    async fn handle_viewer(&self, mut socket: ViewerSocket) {
        let remote = socket.remote_addr();
        info!(remote = %remote, "viewer connected");

        let (sink, mut outbound) = ChannelSink::new();
        let sink_ref: SinkRef = sink.clone();

        if let Err(e) = self.connection_loop(&mut socket, &sink_ref, &mut outbound).await {
            debug!(remote = %remote, error = %e, "connection ended with error");
        }

        sink.close();
        let left = self.sessions.unsubscribe_all(&sink_ref).await;
        info!(remote = %remote, sessions = left, "viewer disconnected");
    }

    async fn connection_loop(
        &self,
        socket: &mut ViewerSocket,
        sink: &SinkRef,
        outbound: &mut mpsc::UnboundedReceiver<ServerMessage>,
    ) -> VcResult<()> {
        loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    socket.send(&message).await?;
                }

                incoming = socket.recv() => match incoming? {
                    Incoming::Requests(requests) => {
                        for request in requests {
                            if let Some(reply) = self.dispatch(request, sink).await {
                                sink.send(&reply);
                            }
                        }
                    }
                    Incoming::Malformed(e) => {
                        warn!(remote = %socket.remote_addr(), error = %e, "dropping malformed request");
                        sink.send(&ack("decode", None, Err(e.to_string())));
                    }
                    Incoming::Closed => {
                        debug!("WebSocket closed by peer");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Apply one request to the session manager.
    async fn dispatch(&self, request: ClientMessage, sink: &SinkRef) -> Option<ServerMessage> {
        let sessions = &self.sessions;
        match request {
            ClientMessage::Create {
                session_id,
                cwd,
                args,
                host_name,
            } => {
                let result = sessions
                    .create(&session_id, Path::new(&cwd), &args, host_name.as_deref())
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                Some(ack("create", Some(session_id), result))
            }
            ClientMessage::Register {
                session_id,
                host_name,
            } => {
                sessions.register(&session_id, &host_name).await;
                Some(ack("register", Some(session_id), Ok(())))
            }
            ClientMessage::Attach { session_id } => {
                let result = match sessions.attach(&session_id).await {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => Err(VcError::SessionNotFound(session_id.clone()).to_string()),
                    Err(e) => Err(e.to_string()),
                };
                Some(ack("attach", Some(session_id), result))
            }
            ClientMessage::Detach { session_id } => {
                let ok = sessions.detach(&session_id).await;
                Some(ack("detach", Some(session_id), check(ok, "not attached")))
            }
            ClientMessage::Subscribe { session_id } => {
                let ok = sessions.subscribe(&session_id, sink.clone()).await;
                Some(ack("subscribe", Some(session_id), check(ok, "unknown session")))
            }
            ClientMessage::Unsubscribe { session_id } => {
                let ok = sessions.unsubscribe(&session_id, sink).await;
                Some(ack("unsubscribe", Some(session_id), check(ok, "not subscribed")))
            }
            // Keystrokes are only acknowledged when they could not be delivered.
            ClientMessage::Input { session_id, data } => {
                if sessions.write(&session_id, &data).await {
                    None
                } else {
                    Some(ack("input", Some(session_id), Err("not attached".into())))
                }
            }
            ClientMessage::Resize {
                session_id,
                cols,
                rows,
            } => {
                if sessions.resize(&session_id, cols, rows).await {
                    None
                } else {
                    Some(ack("resize", Some(session_id), Err("not attached".into())))
                }
            }
            ClientMessage::Kill { session_id } => {
                let result = if sessions.kill(&session_id).await {
                    Ok(())
                } else {
                    Err(VcError::SessionNotFound(session_id.clone()).to_string())
                };
                Some(ack("kill", Some(session_id), result))
            }
            ClientMessage::IsAlive { session_id } => {
                let alive = sessions.is_alive(&session_id).await;
                Some(ServerMessage::Alive { session_id, alive })
            }
            ClientMessage::CreateShell { session_id, cwd } => {
                let result = sessions
                    .create_shell(&session_id, cwd.as_deref().map(Path::new))
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                Some(ack("create_shell", Some(session_id), result))
            }
            ClientMessage::CloseShell { session_id } => {
                let ok = sessions.close_shell(&session_id).await;
                Some(ack("close_shell", Some(session_id), check(ok, "not a shell")))
            }
            ClientMessage::ListShells => Some(ServerMessage::Sessions {
                sessions: sessions.list_shells().await,
            }),
            ClientMessage::List => Some(ServerMessage::Sessions {
                sessions: sessions.list().await,
            }),
            ClientMessage::Info { session_id } => Some(ServerMessage::Sessions {
                sessions: sessions.get(&session_id).await.into_iter().collect(),
            }),
        }
    }
}

fn check(ok: bool, reason: &str) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn ack(request: &str, session_id: Option<String>, result: Result<(), String>) -> ServerMessage {
    ServerMessage::Ack {
        request: request.to_string(),
        session_id,
        ok: result.is_ok(),
        error: result.err(),
    }
}
