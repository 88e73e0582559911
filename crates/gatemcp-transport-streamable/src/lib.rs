//! # gatemcp streamable transport types
//!
//! Pure, no-I/O building blocks used by both ends of the HTTP bindings:
//!
//! - **SSE encoding/decoding**: [`SseEvent`], [`SseEncoder`] and the incremental
//!   [`SseParser`]
//! - **Session ids**: [`SessionId`], a time plus random composite that is
//!   unique across processes
//! - **Configuration**: [`BindingConfig`] with endpoint paths and timeouts
//! - **Header names**: [`headers`]
//!
//! ```rust
//! use gatemcp_transport_streamable::{SseEncoder, SseEvent, SseParser};
//!
//! let wire = SseEncoder::encode(&SseEvent::endpoint("/sse?sessionId=abc"));
//! let events = SseParser::new().feed(&wire);
//! assert_eq!(events[0].event.as_deref(), Some("endpoint"));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config;
pub mod session;
pub mod sse;

pub use config::BindingConfig;
pub use session::{MAX_SESSION_ID_LEN, SessionId};
pub use sse::{SseEncoder, SseEvent, SseParser};

/// HTTP header names used by the bindings
pub mod headers {
    /// Session id header on the multiplexed endpoint
    pub const MCP_SESSION_ID: &str = "Mcp-Session-Id";

    /// Protocol version header sent by clients after `initialize`
    pub const MCP_PROTOCOL_VERSION: &str = "MCP-Protocol-Version";

    /// Last event ID header for SSE resumption
    pub const LAST_EVENT_ID: &str = "Last-Event-ID";

    /// JSON content type
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// SSE content type
    pub const CONTENT_TYPE_SSE: &str = "text/event-stream";

    /// Query parameter carrying the session id on the event-stream endpoint
    pub const SESSION_ID_QUERY: &str = "sessionId";
}

/// SSE event names
pub mod events {
    /// First event on an event-stream binding, carrying the post URL
    pub const ENDPOINT: &str = "endpoint";

    /// Event carrying one envelope
    pub const MESSAGE: &str = "message";
}
