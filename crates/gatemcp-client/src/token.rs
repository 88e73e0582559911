//! Token endpoint client.

use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use gatemcp_auth::{AuthError, Credential, CredentialProvider, TokenResponse};

use crate::error::ClientResult;

/// Request a token for `client_id` and cache it in `provider`.
///
/// The body is form encoded (`client_id=<id>`); without a client id the
/// server issues a token for its default client.
///
/// # Errors
///
/// `Http` if the endpoint cannot be reached, `Auth(TokenEndpoint)` if it
/// answers with an error status or an unusable body.
pub async fn fetch_token(
    http: &reqwest::Client,
    token_url: &Url,
    client_id: Option<&str>,
    provider: &dyn CredentialProvider,
) -> ClientResult<Credential> {
    debug!(%token_url, client_id = ?client_id, "Requesting token");
    let form: Vec<(&str, &str)> = client_id.map(|id| ("client_id", id)).into_iter().collect();
    let response = http.post(token_url.clone()).form(&form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenEndpoint(format!("HTTP {status}: {body}")).into());
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::TokenEndpoint(format!("invalid token response: {e}")))?;
    if token.access_token.is_empty() {
        return Err(AuthError::TokenEndpoint("empty access token".into()).into());
    }

    let credential = Credential::from_response(token, client_id.map(str::to_string), Utc::now());
    info!(client_id = ?client_id, expires_at = ?credential.expires_at, "Token obtained");
    provider.save_tokens(credential.clone());
    Ok(credential)
}
