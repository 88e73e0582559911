//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use gatemcp_client::TransportPolicy;
use gatemcp_transport_traits::BindingKind;

/// `gatemcp` command line
#[derive(Parser, Debug)]
#[command(
    name = "gatemcp",
    version,
    about = "Authenticated MCP transport over SSE and streamable HTTP",
    long_about = "Serve an authenticated MCP endpoint exposing the SSE (/sse) and \
                  streamable HTTP (/mcp) bindings, fetch placeholder tokens from it, \
                  or check a running server end to end.\n\n\
                  Tokens issued here are placeholders for local testing only."
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (repeatable)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (repeatable)
    #[arg(long, short = 'q', global = true, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text", env = "GATEMCP_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Net verbosity: positive for `-v`, negative for `-q`.
    pub fn verbosity(&self) -> i8 {
        let verbose = i8::try_from(self.verbose).unwrap_or(i8::MAX);
        let quiet = i8::try_from(self.quiet).unwrap_or(i8::MAX);
        verbose.saturating_sub(quiet)
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server
    Serve(ServeArgs),

    /// Request a token from a token endpoint and print it
    Token(TokenArgs),

    /// Connect to a server, list its tools and optionally call one
    Check(CheckArgs),
}

/// `serve` arguments
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "GATEMCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, overrides the configuration
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Bindings to serve, overrides the configuration
    #[arg(long, value_delimiter = ',')]
    pub bindings: Option<Vec<BindingKind>>,
}

/// `token` arguments
#[derive(Args, Debug, Clone)]
pub struct TokenArgs {
    /// Token endpoint, e.g. http://localhost:3334/token
    pub url: String,

    /// Client the token is requested for
    #[arg(long, env = "GATEMCP_CLIENT_ID")]
    pub client_id: Option<String>,
}

/// `check` arguments
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Server base URL, e.g. http://localhost:3334
    pub url: String,

    /// Binding selection: auto, event-stream or multiplexed
    #[arg(long, short = 't', default_value = "auto")]
    pub transport: TransportPolicy,

    /// Bearer token; fetched from `<URL>/token` when absent
    #[arg(long, env = "GATEMCP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Client id used when fetching a token
    #[arg(long, env = "GATEMCP_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Tool to call after listing
    #[arg(long)]
    pub call: Option<String>,

    /// Tool arguments as a JSON object
    #[arg(long, short = 'a', default_value = "{}", requires = "call")]
    pub args: String,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable
    Text,
    /// One JSON object per line
    Json,
}
