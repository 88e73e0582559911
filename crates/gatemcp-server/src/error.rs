//! Server error types and their HTTP rendering.

use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use gatemcp_auth::AuthError;
use gatemcp_protocol::{CodecError, Envelope, JsonRpcError, RequestId, error_codes};
use gatemcp_transport_traits::TransportError;

use crate::config::ConfigError;
use crate::router::ExchangeState;

/// Result alias for server operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Errors surfaced by the server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// Credential rejected by the gate.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Session or binding failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Request body is not a valid envelope.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Router state machine breach.
    #[error("Invalid exchange transition from {from:?} to {to:?}")]
    InvalidState {
        /// State the exchange was in
        from: ExchangeState,
        /// State the transition targeted
        to: ExchangeState,
    },

    /// HTTP verb not served on this endpoint.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Resource busy (for example a second push stream).
    #[error("{0}")]
    Conflict(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) if err.is_unauthorized() => StatusCode::UNAUTHORIZED,
            Self::Auth(_) => StatusCode::FORBIDDEN,
            Self::Transport(err) => match err {
                TransportError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                TransportError::SessionRequired | TransportError::Codec(_) => {
                    StatusCode::BAD_REQUEST
                }
                TransportError::BindingClosed(_) | TransportError::SendAfterClose(_) => {
                    StatusCode::GONE
                }
                TransportError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Codec(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidState { .. } | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error object for the reply envelope.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::Auth(err) => err.to_jsonrpc_error(),
            Self::Transport(err) => err.to_jsonrpc_error(),
            Self::Codec(err) => err.to_jsonrpc_error(),
            Self::MethodNotAllowed | Self::Conflict(_) => {
                JsonRpcError::new(error_codes::SERVER_ERROR, self.to_string())
            }
            Self::InvalidState { .. } | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, "Internal error")
            }
        }
    }

    /// Render as a reply, correlating with `id` when known.
    pub fn reply(self, id: Option<RequestId>) -> ErrorReply {
        let id = id.or_else(|| match &self {
            Self::Codec(err) | Self::Transport(TransportError::Codec(err)) => {
                err.request_id().cloned()
            }
            _ => None,
        });
        ErrorReply::new(self.status(), self.to_jsonrpc_error(), id)
    }
}

/// An error envelope with its HTTP status, ready to send.
#[derive(Debug)]
pub struct ErrorReply {
    status: StatusCode,
    envelope: Envelope,
    headers: HeaderMap,
}

impl ErrorReply {
    /// Build a reply.
    pub fn new(status: StatusCode, error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            status,
            envelope: Envelope::error(id, error),
            headers: HeaderMap::new(),
        }
    }

    /// Attach a response header. Values that are not valid header text are skipped.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// HTTP status of the reply.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The error envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

impl From<ServerError> for ErrorReply {
    fn from(err: ServerError) -> Self {
        err.reply(None)
    }
}

impl From<TransportError> for ErrorReply {
    fn from(err: TransportError) -> Self {
        ServerError::from(err).reply(None)
    }
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.envelope.to_value())).into_response()
    }
}
