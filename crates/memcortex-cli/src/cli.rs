//! CLI argument parsing.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "memcortex", version, about = "The memcortex memory server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server, serving MCP requests over the chosen transport.
    Serve {
        /// Which transport to speak.
        #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
        transport: TransportKind,
        /// Address the HTTP transport binds to (ignored for stdio).
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,
        /// Address the real-time WebSocket listener binds to. Runs
        /// alongside whichever `transport` was chosen, since it serves a
        /// separate concern (broadcast/event delivery, not request/response).
        #[arg(long, default_value = "127.0.0.1:8788")]
        ws_bind: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// JSON-RPC over HTTP POST, plus a management surface, via axum.
    Http,
}
