//! Client-side credential cache.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Token endpoint response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type (Bearer)
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// An access credential held for outbound connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token value
    pub access_token: String,
    /// Token type, normally `Bearer`
    pub token_type: String,
    /// Absolute expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Client the token was issued to
    pub client_id: Option<String>,
}

impl Credential {
    /// A bearer credential without expiry.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
            refresh_token: None,
            client_id: None,
        }
    }

    /// Build from a token endpoint response received at `now`.
    pub fn from_response(
        response: TokenResponse,
        client_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
            refresh_token: response.refresh_token,
            client_id,
        }
    }

    /// Whether the credential has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the credential may gate a request right now.
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired(Utc::now())
    }

    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Client registration metadata sent during dynamic registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Display name of the client
    pub client_name: String,
    /// Allowed redirect URIs
    pub redirect_uris: Vec<String>,
}

/// Registration result returned by an authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    /// Assigned client id
    pub client_id: String,
    /// Assigned client secret, if confidential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Caches and supplies credentials for outbound connections.
///
/// All methods are synchronous and never touch the network.
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Where the authorization server redirects after consent.
    fn redirect_url(&self) -> &str;

    /// Metadata used for client registration.
    fn client_metadata(&self) -> &ClientMetadata;

    /// The cached credential, if any.
    fn tokens(&self) -> Option<Credential>;

    /// Replace the cached credential.
    fn save_tokens(&self, credential: Credential);

    /// Cached registration result, if any.
    fn client_information(&self) -> Option<ClientInformation>;

    /// Replace the registration result.
    fn save_client_information(&self, information: ClientInformation);

    /// The pending proof-of-possession secret.
    fn code_verifier(&self) -> AuthResult<String>;

    /// Store the secret for the next exchange, replacing any previous one.
    fn save_code_verifier(&self, verifier: String);

    /// Signal that interactive consent is needed.
    fn redirect_to_authorization(&self, authorization_url: &Url) -> AuthResult<()>;
}

#[derive(Debug, Default)]
struct ProviderState {
    tokens: Option<Credential>,
    client_information: Option<ClientInformation>,
    code_verifier: Option<String>,
}

/// Headless provider keeping everything in memory.
#[derive(Debug)]
pub struct InMemoryCredentialProvider {
    redirect_url: String,
    metadata: ClientMetadata,
    state: RwLock<ProviderState>,
}

impl InMemoryCredentialProvider {
    /// Default redirect target.
    pub const DEFAULT_REDIRECT_URL: &'static str = "http://localhost:3000/callback";

    /// Create a provider registered as `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let provider = Self {
            redirect_url: Self::DEFAULT_REDIRECT_URL.to_string(),
            metadata: ClientMetadata {
                client_name: "gatemcp client".to_string(),
                redirect_uris: vec![Self::DEFAULT_REDIRECT_URL.to_string()],
            },
            state: RwLock::new(ProviderState::default()),
        };
        provider.save_client_information(ClientInformation {
            client_id,
            client_secret: None,
        });
        provider
    }

    /// Seed the cache with a credential.
    pub fn with_tokens(self, credential: Credential) -> Self {
        self.save_tokens(credential);
        self
    }

    /// Override the redirect URL.
    pub fn with_redirect_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.metadata.redirect_uris = vec![url.clone()];
        self.redirect_url = url;
        self
    }

    /// Override the client display name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.client_name = name.into();
        self
    }

    /// Registered client id.
    pub fn client_id(&self) -> Option<String> {
        self.state
            .read()
            .client_information
            .as_ref()
            .map(|info| info.client_id.clone())
    }
}

impl CredentialProvider for InMemoryCredentialProvider {
    fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    fn client_metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    fn tokens(&self) -> Option<Credential> {
        self.state.read().tokens.clone()
    }

    fn save_tokens(&self, credential: Credential) {
        debug!(client_id = ?credential.client_id, "Saving credential");
        self.state.write().tokens = Some(credential);
    }

    fn client_information(&self) -> Option<ClientInformation> {
        self.state.read().client_information.clone()
    }

    fn save_client_information(&self, information: ClientInformation) {
        self.state.write().client_information = Some(information);
    }

    fn code_verifier(&self) -> AuthResult<String> {
        self.state
            .read()
            .code_verifier
            .clone()
            .ok_or(AuthError::NoCodeVerifier)
    }

    fn save_code_verifier(&self, verifier: String) {
        self.state.write().code_verifier = Some(verifier);
    }

    fn redirect_to_authorization(&self, authorization_url: &Url) -> AuthResult<()> {
        warn!(url = %authorization_url, "Interactive authorization requested in headless mode");
        Err(AuthError::AuthorizationRequired {
            url: authorization_url.to_string(),
        })
    }
}
