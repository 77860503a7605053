//! Raw TCP WebSocket listener: accepts connections, performs the
//! handshake, and hands each stream to
//! [`memcortex_transport::websocket::serve_connection`]. Kept separate
//! from the axum HTTP transport (`http.rs`) because the connection pool
//! operates directly on `tokio_tungstenite`'s stream type, not axum's.

use std::sync::Arc;

use memcortex_transport::ConnectionConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::warn;

use crate::composition::Server;

/// Accept connections on `bind` until the process shuts down.
pub async fn run(server: Arc<Server>, bind: String) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind.as_str()).await?;
    tracing::info!(%bind, "serving WebSocket MCP connections");

    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(error) = accept_one(server, stream).await {
                warn!(%peer, %error, "websocket handshake failed");
            }
        });
    }
}

async fn accept_one(server: Arc<Server>, stream: TcpStream) -> anyhow::Result<()> {
    let mut query = ClientQuery::default();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        query = ClientQuery::from_uri(request.uri().query().unwrap_or(""));
        Ok(response)
    })
    .await?;

    let client_id = uuid::Uuid::new_v4().to_string();
    memcortex_transport::websocket::serve_connection(
        ws_stream,
        client_id,
        query.repository,
        query.session_id,
        server.connection_pool.clone(),
        ConnectionConfig::default(),
    )
    .await;
    Ok(())
}

struct ClientQuery {
    repository: String,
    session_id: String,
}

impl Default for ClientQuery {
    fn default() -> Self {
        Self {
            repository: "default".to_string(),
            session_id: "default".to_string(),
        }
    }
}

impl ClientQuery {
    fn from_uri(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "repository" => parsed.repository = value.into_owned(),
                "session_id" => parsed.session_id = value.into_owned(),
                _ => {}
            }
        }
        parsed
    }
}
