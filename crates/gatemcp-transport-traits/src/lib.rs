//! # gatemcp transport traits
//!
//! Foundation types shared by the server and client bindings:
//!
//! - **Trait**: [`Binding`], the `{open, send, receive, close}` capability set
//! - **Types**: [`BindingKind`], [`BindingState`], [`CloseReason`]
//! - **Lifecycle**: [`BindingLifecycle`], the at-most-once close guard every
//!   binding embeds
//! - **Errors**: [`TransportError`], [`TransportResult`]
//!
//! The two binding variants are chosen at bind time. Implementations live in
//! `gatemcp-server` (the serving side) and `gatemcp-client` (the connecting side).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod error;
mod lifecycle;
mod traits;
mod types;

pub use error::{TransportError, TransportResult};
pub use lifecycle::BindingLifecycle;
pub use traits::{Binding, BindingFuture};
pub use types::{BindingKind, BindingState, CloseReason, ParseBindingKindError};
