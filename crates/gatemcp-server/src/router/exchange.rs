//! Per-exchange routing state machine.
//!
//! ```text
//! Unauthenticated --gate ok--> Authenticated --route--> Dispatched --finish--> Closed
//!        |                          |                                            ^
//!        +------- gate error -------+------------- route error ------------------+
//! ```
//!
//! Any transition out of `Closed` fails with [`ServerError::InvalidState`].

use axum::http::Method;

use gatemcp_auth::AuthContext;
use gatemcp_transport_traits::{BindingKind, TransportError};

use crate::error::{ServerError, ServerResult};
use crate::registry::{SessionHandle, SessionRegistry};

/// Where an exchange is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Credential not yet checked
    Unauthenticated,
    /// Gate admitted the credential
    Authenticated,
    /// Routed to a registry or binding operation
    Dispatched,
    /// Finished, successfully or not
    Closed,
}

/// The verb of an inbound exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Deliver one envelope (`POST`)
    Send,
    /// Open the server push stream (`GET`)
    PushOpen,
    /// End the session (`DELETE`)
    Terminate,
}

impl Verb {
    /// Map an HTTP method. Unsupported methods yield `None`.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::POST => Some(Self::Send),
            Method::GET => Some(Self::PushOpen),
            Method::DELETE => Some(Self::Terminate),
            _ => None,
        }
    }
}

/// What the router decided to do with an exchange.
#[derive(Debug)]
pub enum Route {
    /// Create a session and answer with its id
    Handshake,
    /// Hand the envelope to an existing session's binding
    Deliver(SessionHandle),
    /// Attach a push stream to an existing session
    OpenPush(SessionHandle),
    /// Close the named session
    Terminate(SessionHandle),
}

/// Routing state of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    state: ExchangeState,
    auth: Option<AuthContext>,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange {
    /// A fresh, unauthenticated exchange.
    pub fn new() -> Self {
        Self {
            state: ExchangeState::Unauthenticated,
            auth: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// What the gate established, once authenticated.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// Client id from the credential.
    pub fn client_id(&self) -> Option<String> {
        self.auth.as_ref().and_then(|auth| auth.client_id.clone())
    }

    fn transition(&mut self, from: ExchangeState, to: ExchangeState) -> ServerResult<()> {
        if self.state != from {
            let err = ServerError::InvalidState {
                from: self.state,
                to,
            };
            self.state = ExchangeState::Closed;
            return Err(err);
        }
        self.state = to;
        Ok(())
    }

    /// Record a successful gate check.
    pub fn authenticate(&mut self, context: AuthContext) -> ServerResult<()> {
        self.transition(ExchangeState::Unauthenticated, ExchangeState::Authenticated)?;
        self.auth = Some(context);
        Ok(())
    }

    /// Decide the operation for `verb` on binding `kind`.
    ///
    /// `initialize` tells whether a send carries an `initialize` request;
    /// only such a send may open a multiplexed session.
    pub fn route(
        &mut self,
        registry: &SessionRegistry,
        kind: BindingKind,
        verb: Verb,
        session_id: Option<&str>,
        initialize: bool,
    ) -> ServerResult<Route> {
        self.transition(ExchangeState::Authenticated, ExchangeState::Dispatched)?;
        let route = Self::resolve(registry, kind, verb, session_id, initialize);
        if route.is_err() {
            self.state = ExchangeState::Closed;
        }
        route
    }

    fn resolve(
        registry: &SessionRegistry,
        kind: BindingKind,
        verb: Verb,
        session_id: Option<&str>,
        initialize: bool,
    ) -> ServerResult<Route> {
        let lookup = |id: &str| -> ServerResult<SessionHandle> {
            let handle = registry.lookup(id)?;
            // An id minted for the other binding does not exist on this endpoint
            if handle.session().kind() != kind {
                return Err(TransportError::SessionNotFound(id.to_string()).into());
            }
            Ok(handle)
        };

        match (kind, verb, session_id) {
            (BindingKind::EventStream, Verb::PushOpen, _) => Ok(Route::Handshake),
            (BindingKind::EventStream, Verb::Send, Some(id)) => lookup(id).map(Route::Deliver),
            (BindingKind::EventStream, Verb::Send, None) => {
                Err(TransportError::SessionRequired.into())
            }
            (BindingKind::EventStream, Verb::Terminate, _) => Err(ServerError::MethodNotAllowed),

            (BindingKind::Multiplexed, Verb::Send, Some(id)) => match lookup(id) {
                Ok(handle) => Ok(Route::Deliver(handle)),
                Err(_) if initialize => Ok(Route::Handshake),
                Err(err) => Err(err),
            },
            (BindingKind::Multiplexed, Verb::Send, None) if initialize => Ok(Route::Handshake),
            (BindingKind::Multiplexed, Verb::Send, None) => {
                Err(TransportError::SessionRequired.into())
            }
            (BindingKind::Multiplexed, Verb::PushOpen, Some(id)) => lookup(id).map(Route::OpenPush),
            (BindingKind::Multiplexed, Verb::PushOpen, None) => {
                Err(TransportError::SessionRequired.into())
            }
            (BindingKind::Multiplexed, Verb::Terminate, id) => {
                let id = id.unwrap_or_default();
                lookup(id).map(Route::Terminate)
            }
        }
    }

    /// Mark the exchange finished.
    pub fn finish(&mut self) -> ServerResult<()> {
        self.transition(ExchangeState::Dispatched, ExchangeState::Closed)
    }
}
