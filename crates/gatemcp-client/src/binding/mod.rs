//! Client-side bindings.
//!
//! Both variants implement [`Binding`]; [`ClientBinding`] is the tagged
//! alternative the orchestrator holds once a kind has been chosen.

mod event_stream;
pub(crate) mod http;
mod multiplexed;

use std::sync::Arc;

use reqwest::Client;
use url::Url;

use gatemcp_auth::CredentialProvider;
use gatemcp_protocol::Envelope;
use gatemcp_transport_traits::{Binding, BindingFuture, BindingKind, BindingState, CloseReason};

pub use event_stream::EventStreamClient;
pub use multiplexed::MultiplexedClient;

/// The binding chosen for a connection.
#[derive(Debug)]
pub enum ClientBinding {
    /// `GET` stream plus `POST ?sessionId=`
    EventStream(EventStreamClient),
    /// Single endpoint with `Mcp-Session-Id`
    Multiplexed(MultiplexedClient),
}

impl ClientBinding {
    /// Build a binding of `kind` targeting `endpoint`.
    pub fn new(
        kind: BindingKind,
        http: Client,
        endpoint: Url,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        match kind {
            BindingKind::EventStream => {
                Self::EventStream(EventStreamClient::new(http, endpoint, credentials))
            }
            BindingKind::Multiplexed => {
                Self::Multiplexed(MultiplexedClient::new(http, endpoint, credentials))
            }
        }
    }

    /// The multiplexed variant, if this is one.
    pub fn as_multiplexed(&self) -> Option<&MultiplexedClient> {
        match self {
            Self::Multiplexed(binding) => Some(binding),
            Self::EventStream(_) => None,
        }
    }

    fn inner(&self) -> &dyn Binding {
        match self {
            Self::EventStream(binding) => binding,
            Self::Multiplexed(binding) => binding,
        }
    }
}

impl Binding for ClientBinding {
    fn kind(&self) -> BindingKind {
        self.inner().kind()
    }

    fn state(&self) -> BindingState {
        self.inner().state()
    }

    fn session_id(&self) -> Option<String> {
        self.inner().session_id()
    }

    fn open(&self) -> BindingFuture<'_, ()> {
        self.inner().open()
    }

    fn send(&self, envelope: Envelope) -> BindingFuture<'_, ()> {
        self.inner().send(envelope)
    }

    fn receive(&self) -> BindingFuture<'_, Option<Envelope>> {
        self.inner().receive()
    }

    fn close(&self, reason: CloseReason) -> BindingFuture<'_, ()> {
        self.inner().close(reason)
    }
}
