//! Inbound bearer authentication.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};

/// What a successful authentication established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Client the token belongs to, when the validator can tell
    pub client_id: Option<String>,
    /// Token expiry, when known
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decides whether a bearer token is acceptable.
#[async_trait]
pub trait TokenValidator: Send + Sync + std::fmt::Debug {
    /// Validate `token`, returning what it proves.
    async fn validate(&self, token: &str) -> AuthResult<AuthContext>;
}

/// Accepts any token starting with a fixed literal prefix.
///
/// Placeholder only. Anyone who knows the prefix gets in.
#[derive(Debug, Clone)]
pub struct PrefixTokenValidator {
    prefix: String,
}

impl PrefixTokenValidator {
    /// Create a validator for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixTokenValidator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TOKEN_PREFIX)
    }
}

#[async_trait]
impl TokenValidator for PrefixTokenValidator {
    async fn validate(&self, token: &str) -> AuthResult<AuthContext> {
        match token.strip_prefix(self.prefix.as_str()) {
            Some(rest) => Ok(AuthContext {
                client_id: (!rest.is_empty()).then(|| rest.to_string()),
                expires_at: None,
            }),
            None => Err(AuthError::InvalidCredential(
                "token not recognised".to_string(),
            )),
        }
    }
}

/// Extract the token from an `Authorization` header value.
pub fn extract_bearer(authorization: &str) -> AuthResult<&str> {
    let mut parts = authorization.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => Err(AuthError::MissingCredential),
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        // Includes `Bearer` with a blank value: a malformed header, not a
        // token to validate, so invalid_token_format rather than invalid_token
        _ => Err(AuthError::InvalidCredentialScheme),
    }
}

/// Validates the bearer credential of every inbound exchange.
#[derive(Debug, Clone)]
pub struct AuthenticationGate {
    validator: Arc<dyn TokenValidator>,
    realm: String,
}

impl AuthenticationGate {
    /// Create a gate backed by `validator`.
    pub fn new(validator: impl TokenValidator + 'static) -> Self {
        Self::from_arc(Arc::new(validator))
    }

    /// Create a gate sharing an existing validator.
    pub fn from_arc(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            validator,
            realm: "mcp".to_string(),
        }
    }

    /// Set the realm advertised in `WWW-Authenticate`.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Authenticate a raw `Authorization` value.
    pub async fn authenticate(&self, authorization: Option<&str>) -> AuthResult<AuthContext> {
        let Some(value) = authorization else {
            warn!("Rejected request without Authorization header");
            return Err(AuthError::MissingCredential);
        };
        let token = extract_bearer(value).inspect_err(|err| {
            warn!(code = err.code(), "Rejected malformed Authorization header");
        })?;
        let context = self.validator.validate(token).await.inspect_err(|err| {
            warn!(code = err.code(), "Rejected bearer token");
        })?;
        debug!(client_id = ?context.client_id, "Request authenticated");
        Ok(context)
    }

    /// Authenticate from request headers.
    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> AuthResult<AuthContext> {
        match headers.get(AUTHORIZATION) {
            None => self.authenticate(None).await,
            Some(value) => match value.to_str() {
                Ok(text) => self.authenticate(Some(text)).await,
                Err(_) => Err(AuthError::InvalidCredentialScheme),
            },
        }
    }

    /// `WWW-Authenticate` header value for a rejection.
    pub fn www_authenticate(&self, error: &AuthError) -> String {
        let mut header = format!("Bearer realm=\"{}\"", self.realm);
        if !matches!(error, AuthError::MissingCredential) {
            header.push_str(&format!(
                ", error=\"invalid_token\", error_description=\"{}\"",
                error.to_string().replace('"', "'")
            ));
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(extract_bearer("Bearer mytoken123").unwrap(), "mytoken123");
        assert_eq!(extract_bearer("bearer mytoken123").unwrap(), "mytoken123");
        assert_eq!(extract_bearer("   "), Err(AuthError::MissingCredential));
        assert_eq!(extract_bearer("mytoken123"), Err(AuthError::InvalidCredentialScheme));
        assert_eq!(extract_bearer("Basic dXNlcg=="), Err(AuthError::InvalidCredentialScheme));
        assert_eq!(extract_bearer("Bearer a b"), Err(AuthError::InvalidCredentialScheme));
        assert_eq!(extract_bearer("Bearer "), Err(AuthError::InvalidCredentialScheme));
    }

    #[tokio::test]
    async fn test_gate_sub_codes() {
        let gate = AuthenticationGate::new(PrefixTokenValidator::default());
        assert_eq!(
            gate.authenticate(None).await.unwrap_err().code(),
            "missing_token"
        );
        assert_eq!(
            gate.authenticate(Some("Token abc")).await.unwrap_err().code(),
            "invalid_token_format"
        );
        assert_eq!(
            gate.authenticate(Some("Bearer nope")).await.unwrap_err().code(),
            "invalid_token"
        );
        let context = gate
            .authenticate(Some("Bearer test_token_client7"))
            .await
            .unwrap();
        assert_eq!(context.client_id.as_deref(), Some("client7"));
    }

    #[tokio::test]
    async fn test_non_ascii_header_is_bad_scheme() {
        let gate = AuthenticationGate::new(PrefixTokenValidator::default());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_bytes(b"Bearer \xfftok").unwrap());
        assert_eq!(
            gate.authenticate_headers(&headers).await,
            Err(AuthError::InvalidCredentialScheme)
        );
    }

    #[test]
    fn test_www_authenticate() {
        let gate = AuthenticationGate::new(PrefixTokenValidator::default());
        assert_eq!(
            gate.www_authenticate(&AuthError::MissingCredential),
            "Bearer realm=\"mcp\""
        );
        assert!(
            gate.www_authenticate(&AuthError::InvalidCredential("x".into()))
                .contains("error=\"invalid_token\"")
        );
    }
}
