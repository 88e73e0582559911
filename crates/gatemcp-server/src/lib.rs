//! # gatemcp server
//!
//! Serving side of the authenticated MCP transport. One process can expose
//! both HTTP bindings:
//!
//! - **Event-stream** (`GET /sse` opens the push stream and creates the session,
//!   `POST /sse?sessionId=..` delivers one envelope)
//! - **Multiplexed** (`/mcp`: `POST` sends, `GET` opens the push stream,
//!   `DELETE` terminates; the session id travels in `Mcp-Session-Id`)
//!
//! ## Request flow
//!
//! ```text
//! HTTP exchange -> AuthenticationGate -> router -> SessionRegistry -> binding
//!                                                       |
//!                         session pump <- receive() <---+
//!                              |
//!                       McpDispatcher -> tools -> send() -> peer
//! ```
//!
//! Every session owns one binding and one pump task. The pump is the only
//! consumer of the binding's inbound queue, so replies leave in the order
//! requests arrived.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatemcp_server::{GateServer, ServerConfig};
//!
//! # async fn run() -> gatemcp_server::ServerResult<()> {
//! let server = GateServer::new(ServerConfig::default())?;
//! server.run().await
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod binding;
pub mod config;
pub mod dispatch;
mod error;
pub mod registry;
pub mod router;
mod server;
pub mod tools;

pub use binding::{EventStreamBinding, MultiplexedBinding, SessionBinding};
pub use config::{AuthSettings, ConfigError, ServerConfig, ValidationMode};
pub use dispatch::McpDispatcher;
pub use error::{ErrorReply, ServerError, ServerResult};
pub use registry::{Session, SessionHandle, SessionPhase, SessionRegistry};
pub use router::{AppState, Exchange, ExchangeState, Route, Verb, build_router};
pub use server::{GateServer, shutdown_signal};
pub use tools::{EchoTool, ServerInfoTool, ToolContext, ToolError, ToolHandler, ToolRegistry};
