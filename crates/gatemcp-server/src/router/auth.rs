//! Authentication middleware.
//!
//! Runs the [`AuthenticationGate`](gatemcp_auth::AuthenticationGate) before
//! any binding handler. A rejected exchange never reaches the registry.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ServerError;
use crate::router::{AppState, Exchange};

/// Validate the bearer credential and attach an authenticated [`Exchange`].
pub async fn authentication_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut exchange = Exchange::new();

    let context = match state.gate.authenticate_headers(request.headers()).await {
        Ok(context) => context,
        Err(err) => {
            let challenge = state.gate.www_authenticate(&err);
            return ServerError::Auth(err)
                .reply(None)
                .with_header(header::WWW_AUTHENTICATE, &challenge)
                .into_response();
        }
    };

    if let Err(err) = exchange.authenticate(context) {
        return err.reply(None).into_response();
    }
    debug!(method = %request.method(), path = %request.uri().path(), "Exchange authenticated");
    request.extensions_mut().insert(exchange);

    next.run(request).await
}
