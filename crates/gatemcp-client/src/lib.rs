//! # gatemcp client
//!
//! Connects to an authenticated gatemcp server over either HTTP binding.
//!
//! - [`ConnectionOrchestrator`] negotiates the binding, enforces the connect
//!   deadline and exposes `list_tools`, `call_tool` and `cleanup`.
//! - [`EventStreamClient`] and [`MultiplexedClient`] are the two
//!   [`Binding`](gatemcp_transport_traits::Binding) implementations over
//!   `reqwest`.
//! - [`Correlator`] matches replies to requests by id so many calls can be
//!   in flight on one binding.
//! - [`fetch_token`] obtains a credential from the server's token endpoint.
//!
//! Credentials come from a [`CredentialProvider`](gatemcp_auth::CredentialProvider);
//! a refused credential is reported as an authentication failure and never
//! triggers a binding fallback.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod binding;
mod correlator;
mod error;
mod orchestrator;
mod token;

pub use binding::{ClientBinding, EventStreamClient, MultiplexedClient};
pub use correlator::Correlator;
pub use error::{ClientError, ClientResult};
pub use orchestrator::{ConnectOptions, ConnectionOrchestrator, TransportPolicy};
pub use token::fetch_token;
