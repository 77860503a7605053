//! Newline-delimited JSON transport over stdin/stdout, used when the
//! server runs as a local MCP subprocess rather than a WebSocket host.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use memcortex_protocol::{JsonRpcMessage, MemoryError, MemoryResult};

/// Reads newline-delimited JSON-RPC messages from an async reader.
pub struct StdioReader<R> {
    lines: tokio::io::Lines<BufReader<R>>,
}

impl<R: tokio::io::AsyncRead + Unpin> StdioReader<R> {
    /// Wrap `reader` for line-delimited decoding.
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Read and decode the next message. Returns `Ok(None)` at EOF, and
    /// silently skips blank lines (some clients pad frames with them).
    pub async fn next_message(&mut self) -> MemoryResult<Option<JsonRpcMessage>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| MemoryError::Transport(e.to_string()))?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let message: JsonRpcMessage =
                        serde_json::from_str(&line).map_err(MemoryError::Serialization)?;
                    return Ok(Some(message));
                }
            }
        }
    }
}

/// Writes newline-delimited JSON-RPC messages to an async writer.
pub struct StdioWriter<W> {
    writer: BufWriter<W>,
}

impl<W: tokio::io::AsyncWrite + Unpin> StdioWriter<W> {
    /// Wrap `writer` for line-delimited encoding.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Serialize `message` and write it followed by a single `\n`,
    /// then flush so the peer observes it immediately.
    pub async fn send(&mut self, message: &impl serde::Serialize) -> MemoryResult<()> {
        let mut line = serde_json::to_vec(message).map_err(MemoryError::Serialization)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|e| MemoryError::Transport(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| MemoryError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memcortex_protocol::{JsonRpcRequest, RequestId};

    #[tokio::test]
    async fn round_trips_a_request_through_a_pipe() {
        let request = JsonRpcRequest::new("ping", None, RequestId::from("1"));
        let mut buf = Vec::new();
        {
            let mut writer = StdioWriter::new(&mut buf);
            writer.send(&request).await.unwrap();
        }
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = StdioReader::new(&buf[..]);
        let message = reader.next_message().await.unwrap().unwrap();
        assert_eq!(message.method(), Some("ping"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_lines_between_frames_are_skipped() {
        let input = b"\n{\"jsonrpc\":\"2.0\",\"method\":\"a\",\"id\":\"1\"}\n\n";
        let mut reader = StdioReader::new(&input[..]);
        let message = reader.next_message().await.unwrap().unwrap();
        assert_eq!(message.method(), Some("a"));
        assert!(reader.next_message().await.unwrap().is_none());
    }
}
