//! Placeholder token issuing for the `/token` endpoint.
//!
//! Tokens are deterministic strings derived from the client id. There is no
//! signature and no secret; this exists so clients can exercise the full
//! fetch-token, connect, call-tool path against a test server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::credential::TokenResponse;
use crate::error::{AuthError, AuthResult};
use crate::gate::{AuthContext, TokenValidator};

/// Client id used when a token request names none.
pub const DEFAULT_CLIENT_ID: &str = "test_client_id";

/// Body of a token request (form or JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Requesting client
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    client_id: String,
    expires_at: DateTime<Utc>,
}

/// Issues tokens and remembers them until they expire.
#[derive(Debug)]
pub struct TokenIssuer {
    prefix: String,
    ttl: Duration,
    issued: DashMap<String, IssuedToken>,
}

impl TokenIssuer {
    /// Create an issuer minting `{prefix}{client_id}` tokens valid for `ttl`.
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
            issued: DashMap::new(),
        }
    }

    /// Issue (or re-issue) a token for the requesting client.
    pub fn issue(&self, request: &TokenRequest) -> TokenResponse {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CLIENT_ID);
        let access_token = format!("{}{}", self.prefix, client_id);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.issued.insert(
            access_token.clone(),
            IssuedToken {
                client_id: client_id.to_string(),
                expires_at,
            },
        );
        info!(client_id, "Issued access token");

        TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: Some(self.ttl.as_secs()),
            refresh_token: Some(format!("refresh_token_{client_id}")),
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.issued.len();
        self.issued.retain(|_, token| token.expires_at > now);
        before - self.issued.len()
    }
}

#[async_trait]
impl TokenValidator for TokenIssuer {
    async fn validate(&self, token: &str) -> AuthResult<AuthContext> {
        let Some(entry) = self.issued.get(token) else {
            return Err(AuthError::InvalidCredential("token was not issued here".into()));
        };
        if entry.expires_at <= Utc::now() {
            return Err(AuthError::InvalidCredential("token expired".into()));
        }
        Ok(AuthContext {
            client_id: Some(entry.client_id.clone()),
            expires_at: Some(entry.expires_at),
        })
    }
}
