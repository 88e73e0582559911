//! Transport error types.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use gatemcp_protocol::{CodecError, JsonRpcError, error_codes};

use crate::types::CloseReason;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The session id does not name a live session.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The operation needs a session id and none was supplied.
    #[error("Session ID is required")]
    SessionRequired,

    /// The binding has closed; nothing more can be sent.
    #[error("Binding closed ({0})")]
    BindingClosed(CloseReason),

    /// Inbound delivery raced a close and lost.
    #[error("Send after close on session {0}")]
    SendAfterClose(String),

    /// The peer does not speak the attempted binding.
    #[error("Negotiation rejected with HTTP {status}: {message}")]
    NegotiationRejected {
        /// HTTP status of the rejected handshake
        status: u16,
        /// Body or reason text
        message: String,
    },

    /// The peer refused the bearer credential.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connection establishment timed out.
    #[error("Connection timed out after {timeout:?} for operation: {operation}")]
    ConnectionTimeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// Single request timed out.
    #[error("Request timed out after {timeout:?} for operation: {operation}")]
    RequestTimeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The peer violated the binding protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Whether a client may fall back to another binding after this error.
    pub fn is_negotiation_rejection(&self) -> bool {
        matches!(self, Self::NegotiationRejected { .. })
    }

    /// Wire representation used when the error is reported inside an envelope.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::SessionNotFound(_) => {
                JsonRpcError::new(error_codes::SESSION_NOT_FOUND, "Session not found")
            }
            Self::SessionRequired => JsonRpcError::with_data(
                error_codes::SERVER_ERROR,
                "Session ID is required",
                serde_json::json!({ "error": "missing_session_id" }),
            ),
            Self::BindingClosed(reason) => JsonRpcError::with_data(
                error_codes::BINDING_CLOSED,
                self.to_string(),
                json!({ "reason": reason.as_str() }),
            ),
            Self::SendAfterClose(_) => {
                JsonRpcError::new(error_codes::BINDING_CLOSED, self.to_string())
            }
            Self::RequestTimeout { operation, timeout } => JsonRpcError::with_data(
                error_codes::REQUEST_TIMEOUT,
                self.to_string(),
                json!({
                    "operation": operation,
                    "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            ),
            Self::Codec(codec) => codec.to_jsonrpc_error(),
            other => JsonRpcError::internal_error(&other.to_string()),
        }
    }

    /// Recover a transport failure a peer reported inside an error envelope.
    ///
    /// Only the binding-closed and request-timeout codes are transport
    /// failures; anything else is an application error and yields `None`.
    pub fn from_jsonrpc_error(error: &JsonRpcError) -> Option<Self> {
        match error.code {
            error_codes::BINDING_CLOSED => {
                let reason = data_field(error, "reason")
                    .and_then(|value| value.as_str())
                    .and_then(CloseReason::from_name)
                    .unwrap_or(CloseReason::Terminated);
                Some(Self::BindingClosed(reason))
            }
            error_codes::REQUEST_TIMEOUT => Some(Self::RequestTimeout {
                operation: data_field(error, "operation")
                    .and_then(|value| value.as_str())
                    .unwrap_or("request")
                    .to_string(),
                timeout: Duration::from_millis(
                    data_field(error, "timeout_ms").and_then(|value| value.as_u64()).unwrap_or(0),
                ),
            }),
            _ => None,
        }
    }
}

fn data_field<'a>(error: &'a JsonRpcError, name: &str) -> Option<&'a Value> {
    error.data.as_ref().and_then(|data| data.get(name))
}
