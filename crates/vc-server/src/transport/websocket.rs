//! Viewer connections over WebSocket (tokio-tungstenite).
//!
//! Both directions carry the length-prefixed CBOR frames of
//! [`vc_core::codec`], one or more per binary message. Requests may be split
//! across messages; [`ViewerSocket`] reassembles them.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use vc_core::{frame_encode, ClientMessage, FrameDecoder, ServerMessage, VcError, VcResult};

/// Slow or silent clients are dropped if the upgrade takes longer than this.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What a viewer sent.
#[derive(Debug)]
pub enum Incoming {
    /// One or more complete requests.
    Requests(Vec<ClientMessage>),
    /// Bytes that do not decode as a request. The connection is still usable.
    Malformed(VcError),
    /// The peer closed the connection.
    Closed,
}

/// An upgraded viewer connection.
pub struct ViewerSocket {
    ws: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    decoder: FrameDecoder,
}

impl ViewerSocket {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Frame and send one server message.
    pub async fn send(&mut self, message: &ServerMessage) -> VcResult<()> {
        let frame = frame_encode(message)?;
        self.ws
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| VcError::Transport(format!("send to {} failed: {e}", self.remote_addr)))
    }

    /// Wait for the next complete request(s).
    ///
    /// Partial frames are buffered across messages. Only transport failures
    /// are returned as errors.
    pub async fn recv(&mut self) -> VcResult<Incoming> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    match self.decoder.feed::<ClientMessage>(&data) {
                        Ok(requests) if requests.is_empty() => {
                            debug!(pending = self.decoder.pending(), "partial request frame");
                        }
                        Ok(requests) => return Ok(Incoming::Requests(requests)),
                        Err(e) => return Ok(Incoming::Malformed(e)),
                    }
                }
                Some(Ok(Message::Text(_))) => {
                    return Ok(Incoming::Malformed(VcError::InvalidMessage(
                        "text messages are not supported; send CBOR frames".into(),
                    )));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                        debug!(remote = %self.remote_addr, error = %e, "pong failed");
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(Incoming::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(VcError::Transport(format!(
                        "receive from {} failed: {e}",
                        self.remote_addr
                    )));
                }
            }
        }
    }
}

/// Bind `bind_addr` and upgrade incoming connections in the background.
///
/// Returns the bound address (useful with port 0) and a stream of
/// upgraded viewers.
pub async fn listen(bind_addr: &str) -> VcResult<(SocketAddr, mpsc::Receiver<ViewerSocket>)> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| VcError::Transport(format!("bind {bind_addr} failed: {e}")))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "listening for viewers");

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let upgrade =
                    tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream));
                let ws = match upgrade.await {
                    Ok(Ok(ws)) => ws,
                    Ok(Err(e)) => {
                        warn!(remote = %remote_addr, error = %e, "WebSocket upgrade failed");
                        return;
                    }
                    Err(_) => {
                        warn!(remote = %remote_addr, "WebSocket upgrade timed out");
                        return;
                    }
                };
                let socket = ViewerSocket {
                    ws,
                    remote_addr,
                    decoder: FrameDecoder::new(),
                };
                if tx.send(socket).await.is_err() {
                    debug!(remote = %remote_addr, "server stopped, dropping viewer");
                }
            });
        }
    });

    Ok((local_addr, rx))
}
