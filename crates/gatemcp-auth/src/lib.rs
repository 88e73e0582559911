//! # gatemcp auth
//!
//! Bearer authentication for both sides of the transport.
//!
//! ## Server side
//!
//! [`AuthenticationGate`] extracts the `Authorization` header, checks the
//! bearer scheme and hands the token to a [`TokenValidator`]. It runs before
//! any session lookup, so a rejected request never touches the registry.
//!
//! Two validators ship here:
//! - [`PrefixTokenValidator`] accepts any token with a fixed literal prefix.
//!   This is a placeholder check and offers no security.
//! - [`TokenIssuer`] backs the `/token` endpoint and only accepts tokens it
//!   issued that have not yet expired.
//!
//! ## Client side
//!
//! [`CredentialProvider`] caches the [`Credential`] and client registration
//! metadata used for outbound connections. [`InMemoryCredentialProvider`] is
//! the headless implementation: interactive consent fails with
//! [`AuthError::AuthorizationRequired`].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod credential;
mod error;
mod gate;
mod issuer;

pub use credential::{
    ClientInformation, ClientMetadata, Credential, CredentialProvider,
    InMemoryCredentialProvider, TokenResponse,
};
pub use error::{AuthError, AuthResult};
pub use gate::{
    AuthContext, AuthenticationGate, PrefixTokenValidator, TokenValidator, extract_bearer,
};
pub use issuer::{DEFAULT_CLIENT_ID, TokenIssuer, TokenRequest};

/// Token prefix accepted by the placeholder validator.
pub const DEFAULT_TOKEN_PREFIX: &str = "test_token_";
