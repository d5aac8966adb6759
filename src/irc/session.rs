/// Per-connection drive loops.
///
/// Both transports feed inbound lines to the gateway one at a time and
/// drain the connection's outbound queue. Whatever ends the loop (socket
/// close, transport error, QUIT, takeover), the gateway's disconnect
/// cleanup runs exactly once afterwards.
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{split_frame, LineCodec};
use super::message::Message;
use super::server::{Gateway, Outbound};

/// Drive one WebSocket connection. Each text frame may carry one or more
/// lines; each outbound line goes out as its own text frame.
pub async fn run_websocket(gateway: Gateway, socket: WebSocket, addr: SocketAddr) {
    let (id, mut rx) = gateway.connect(addr).await;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let keepalive = gateway.config.keepalive;
    let mut last_ping = Instant::now();

    loop {
        let ping_delay = tokio::time::sleep_until((last_ping + keepalive).into());

        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        for inbound in split_frame(text.as_str()) {
                            gateway.handle_inbound(id, inbound).await;
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let text = String::from_utf8_lossy(&bytes);
                        for inbound in split_frame(&text) {
                            gateway.handle_inbound(id, inbound).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn = id, %addr, "websocket read error: {e}");
                        break;
                    }
                    // Ping is answered by axum; Pong needs nothing.
                    Some(Ok(_)) => {}
                }
            }

            out = rx.recv() => {
                match out {
                    Some(Outbound::Line(msg)) => {
                        let frame = format!("{}\r\n", msg.to_wire());
                        if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping_delay => {
                if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
                last_ping = Instant::now();
            }
        }
    }

    gateway.disconnect(id).await;
    debug!(conn = id, %addr, "websocket session ended");
}

/// Accept raw TCP line clients until the listener fails.
pub async fn accept_tcp(
    listener: TcpListener,
    gateway: Gateway,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let gateway = gateway.clone();
        tokio::spawn(async move {
            run_tcp(gateway, socket, addr).await;
        });
    }
}

/// Drive one raw TCP connection framed by [`LineCodec`].
pub async fn run_tcp(gateway: Gateway, socket: TcpStream, addr: SocketAddr) {
    let (id, mut rx) = gateway.connect(addr).await;
    let mut framed = Framed::new(socket, LineCodec::new());
    let keepalive = gateway.config.keepalive;
    let mut ticker = tokio::time::interval_at((Instant::now() + keepalive).into(), keepalive);

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(inbound)) => gateway.handle_inbound(id, inbound).await,
                    Some(Err(e)) => {
                        warn!(conn = id, %addr, "read error: {e}");
                        break;
                    }
                    None => break,
                }
            }

            out = rx.recv() => {
                match out {
                    Some(Outbound::Line(msg)) => {
                        if let Err(e) = framed.send(msg).await {
                            warn!(conn = id, %addr, "write error: {e}");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }

            _ = ticker.tick() => {
                let ping = Message::with_trailing(None, "PING", vec![gateway.server().to_owned()]);
                if framed.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }

    gateway.disconnect(id).await;
    info!(conn = id, %addr, "tcp session ended");
}
