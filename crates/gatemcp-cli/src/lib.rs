//! # `gatemcp` CLI
//!
//! Serve an authenticated MCP endpoint, fetch a token from one, or check it
//! end to end.
//!
//! ```bash
//! # Serve both bindings on the default address
//! gatemcp serve
//!
//! # Obtain a placeholder token
//! gatemcp token http://localhost:3334/token --client-id alice
//!
//! # Connect (auto-detect), list tools and call one
//! gatemcp check http://localhost:3334 --call echo --args '{"message": "hi"}'
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod logging;

pub use cli::{Cli, Commands, LogFormat, CheckArgs, ServeArgs, TokenArgs};

/// Install logging and run the selected subcommand.
///
/// # Errors
///
/// Whatever the subcommand reports, with context attached.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    logging::init(cli.verbosity(), cli.log_format)?;
    match cli.command {
        Commands::Serve(args) => commands::serve(args).await,
        Commands::Token(args) => commands::token(args).await,
        Commands::Check(args) => commands::check(args).await,
    }
}
