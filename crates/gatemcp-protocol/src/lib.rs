//! # gatemcp protocol
//!
//! The protocol layer shared by every gatemcp crate:
//!
//! - **Envelope codec**: [`Envelope`] is one JSON-RPC 2.0 message unit (request,
//!   response or notification). [`Envelope::decode`] and [`Envelope::encode`]
//!   convert between bytes and envelopes, rejecting anything that is not a
//!   well-formed 2.0 message.
//! - **Error codes**: [`error_codes`] holds the numeric codes used on the wire,
//!   including the transport specific ones (session and binding failures).
//! - **MCP payloads**: [`types`] carries the `initialize`, `tools/list` and
//!   `tools/call` shapes the server and client exchange.
//!
//! ```rust
//! use gatemcp_protocol::{Envelope, RequestId};
//!
//! let request = Envelope::request(RequestId::Number(1), "tools/list", None);
//! let bytes = request.encode().unwrap();
//! assert_eq!(Envelope::decode(&bytes).unwrap(), request);
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod error;
pub mod jsonrpc;
pub mod types;

pub use error::{CodecError, CodecResult};
pub use jsonrpc::{
    Envelope, EnvelopeKind, JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ResponsePayload, error_codes,
};

/// MCP method names used by gatemcp.
pub mod methods {
    /// Lifecycle handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Client acknowledgement of a completed handshake
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check
    pub const PING: &str = "ping";
    /// Tool discovery
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Protocol version this implementation prefers.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions accepted during `initialize`, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
