//! Codec error types.

use thiserror::Error;

use crate::jsonrpc::{JsonRpcError, RequestId, error_codes};

/// Result alias for envelope encoding and decoding.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors raised while converting between bytes and envelopes.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CodecError {
    /// The bytes were not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The JSON was valid but does not form a JSON-RPC 2.0 envelope.
    #[error("Invalid envelope: {reason}")]
    InvalidEnvelope {
        /// What was wrong with the message
        reason: String,
        /// Request id recovered from the message, if any
        id: Option<RequestId>,
    },

    /// Serializing an envelope failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl CodecError {
    pub(crate) fn invalid(reason: impl Into<String>, id: Option<RequestId>) -> Self {
        Self::InvalidEnvelope {
            reason: reason.into(),
            id,
        }
    }

    /// The originating request id, when one could be recovered.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::InvalidEnvelope { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// Wire representation of this failure.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::Parse(details) => JsonRpcError::with_data(
                error_codes::PARSE_ERROR,
                "Parse error",
                serde_json::json!({ "details": details }),
            ),
            Self::InvalidEnvelope { reason, .. } => JsonRpcError::with_data(
                error_codes::INVALID_REQUEST,
                "Invalid Request",
                serde_json::json!({ "reason": reason }),
            ),
            Self::Serialization(details) => JsonRpcError::internal_error(details),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
