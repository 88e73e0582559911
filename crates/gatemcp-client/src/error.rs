//! Client error types.

use thiserror::Error;

use gatemcp_auth::AuthError;
use gatemcp_protocol::{CodecError, JsonRpcError};
use gatemcp_transport_traits::TransportError;

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors surfaced to callers of the client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Binding, negotiation or timeout failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Credential could not be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A reply could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The HTTP client failed before a status was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The target is not a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The peer reported a tool failure.
    #[error("Tool '{tool}' failed: {} ({})", error.message, error.code)]
    RemoteTool {
        /// Tool that was invoked
        tool: String,
        /// Error object exactly as the peer sent it
        error: JsonRpcError,
    },

    /// The peer answered a non-tool request with an error.
    #[error("{method} failed: {} ({})", error.message, error.code)]
    Rpc {
        /// Method that was requested
        method: String,
        /// Error object from the peer
        error: JsonRpcError,
    },

    /// No binding is established.
    #[error("Not connected")]
    NotConnected,

    /// `cleanup()` already ran.
    #[error("Connection closed")]
    Closed,

    /// A reply had an unexpected shape.
    #[error("Unexpected reply: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether the peer refused the credential.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::AuthenticationFailed(_)) | Self::Auth(_)
        )
    }

    /// Whether the connect deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport(
                TransportError::ConnectionTimeout { .. } | TransportError::RequestTimeout { .. }
            )
        )
    }

    /// Whether the peer does not speak the attempted binding.
    pub fn is_negotiation_rejection(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_negotiation_rejection())
    }
}
