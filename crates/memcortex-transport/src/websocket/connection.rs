//! Per-connection reader/writer tasks: heartbeat, deadline resets, and
//! the glue between a raw WebSocket stream and a [`ClientHandle`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use super::pool::ConnectionPool;
use super::types::{ClientHandle, OutboundMessage};

/// Heartbeat and deadline tuning for a single connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// How often a ping frame is sent on an otherwise idle connection.
    pub ping_interval: Duration,
    /// How long to wait for a pong before the connection is considered dead.
    pub pong_timeout: Duration,
    /// Outbound queue depth handed to the client's [`ClientHandle`].
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
        }
    }
}

/// Drive a single accepted WebSocket connection until it closes, is
/// evicted by the pool, or misses its pong deadline.
///
/// Registers a [`ClientHandle`] in `pool` for the duration of the
/// connection and always removes it on exit, regardless of which path
/// caused the exit.
pub async fn serve_connection(
    stream: WebSocketStream<TcpStream>,
    client_id: String,
    repository: String,
    session_id: String,
    pool: Arc<ConnectionPool>,
    config: ConnectionConfig,
) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(config.outbound_buffer);

    let client = ClientHandle::new(client_id.clone(), repository, session_id, tx);
    if super::pool::Admission::Full == pool.add(client.clone()) {
        warn!(client_id = %client_id, "connection pool full, rejecting client");
        let _ = sink.close().await;
        return;
    }

    let mut ping_tick = interval(config.ping_interval);
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(OutboundMessage(payload)) => {
                        if sink.send(WsMessage::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        client.touch();
                        debug!(client_id = %client_id, bytes = text.len(), "received text frame");
                        // Application-level dispatch happens in memcortex-server;
                        // this transport layer only tracks liveness here.
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        client.touch();
                        awaiting_pong = false;
                        last_pong = Instant::now();
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        client.touch();
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(client_id = %client_id, %error, "websocket read error");
                        break;
                    }
                }
            }
            _ = ping_tick.tick() => {
                if awaiting_pong && last_pong.elapsed() > config.pong_timeout {
                    warn!(client_id = %client_id, "pong timeout, closing connection");
                    break;
                }
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }

        // The pool evicts slow consumers during broadcast; if we're no
        // longer registered there's nothing left to serve.
        if pool.get(&client_id).is_none() {
            break;
        }
    }

    pool.remove(&client_id);
    let _ = sink.close().await;
}
