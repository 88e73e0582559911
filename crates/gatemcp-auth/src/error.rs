//! Authentication errors.

use thiserror::Error;

use gatemcp_protocol::{JsonRpcError, error_codes};

/// Result alias for authentication operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Authentication failures. None of these are retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("Authorization header is required")]
    MissingCredential,

    /// The header is not of the form `Bearer <token>`.
    #[error("Authorization header must be in format: Bearer <token>")]
    InvalidCredentialScheme,

    /// The token was rejected by the validator.
    #[error("Invalid access token: {0}")]
    InvalidCredential(String),

    /// Interactive consent is required and cannot be obtained headlessly.
    #[error("Authorization required: {url}")]
    AuthorizationRequired {
        /// Where the user would have been sent
        url: String,
    },

    /// No proof-of-possession secret is pending.
    #[error("No code verifier saved")]
    NoCodeVerifier,

    /// The token endpoint returned something unusable.
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),
}

impl AuthError {
    /// Machine readable sub-code reported to the peer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_token",
            Self::InvalidCredentialScheme => "invalid_token_format",
            Self::InvalidCredential(_) => "invalid_token",
            Self::AuthorizationRequired { .. } => "authorization_required",
            Self::NoCodeVerifier => "invalid_grant",
            Self::TokenEndpoint(_) => "server_error",
        }
    }

    /// Whether this failure is an inbound credential rejection (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential | Self::InvalidCredentialScheme | Self::InvalidCredential(_)
        )
    }

    /// Error object placed in the unauthorized envelope.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::with_data(
            error_codes::SERVER_ERROR,
            self.to_string(),
            serde_json::json!({ "error": self.code() }),
        )
    }
}
