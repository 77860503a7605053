//! Runs the dispatcher over stdin/stdout as a single MCP connection,
//! the transport used when memcortex is launched as a local subprocess.

use std::sync::Arc;
use std::time::Instant;

use memcortex_protocol::{JsonRpcMessage, JsonRpcResponse};
use memcortex_server::McpSession;
use memcortex_transport::{StdioReader, StdioWriter};
use tracing::{error, info};

use crate::composition::Server;

pub async fn run(server: &Server) -> anyhow::Result<()> {
    let mut reader = StdioReader::new(tokio::io::stdin());
    let mut writer = StdioWriter::new(tokio::io::stdout());
    let session = Arc::new(McpSession::new());

    info!("serving MCP over stdio");
    loop {
        let message = match reader.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(error) => {
                writer.send(&JsonRpcResponse::parse_error(Some(error.to_string()))).await?;
                continue;
            }
        };

        match message {
            JsonRpcMessage::Request(request) => {
                let started = Instant::now();
                let method = request.method.clone();
                let request_id = request.id.clone();
                let request_bytes = serde_json::to_vec(&request).map(|bytes| bytes.len()).unwrap_or(0);

                let outcome = server
                    .scheduler
                    .schedule(server.dispatcher.clone(), session.clone(), request)
                    .await;
                match outcome {
                    Ok(outcome) => {
                        for notification in outcome.notifications {
                            writer.send(&notification).await?;
                        }
                        if let Some(response) = outcome.response {
                            let response_bytes = serde_json::to_vec(&response).map(|bytes| bytes.len()).unwrap_or(0);
                            server
                                .metrics
                                .record(&method, started.elapsed(), request_bytes, response_bytes, response.is_error());
                            writer.send(&response).await?;
                        }
                    }
                    Err(error) => {
                        let response = JsonRpcResponse::error_response(error.into(), request_id);
                        let response_bytes = serde_json::to_vec(&response).map(|bytes| bytes.len()).unwrap_or(0);
                        server
                            .metrics
                            .record(&method, started.elapsed(), request_bytes, response_bytes, response.is_error());
                        writer.send(&response).await?;
                    }
                }
            }
            JsonRpcMessage::Notification(notification) => {
                server.dispatcher.dispatch_notification(&session, notification);
            }
            JsonRpcMessage::Response(_) => {
                error!("received a response on the server side of a stdio connection, ignoring");
            }
        }
    }

    session.close();
    Ok(())
}
