//! Session lifecycle and inbound message routing.
//!
//! The [`SessionManager`] owns the connect / pairing / backoff-reconnect
//! loop over an abstract transport; the [`MessageRouter`] classifies inbound
//! messages and hands accepted lookups to a [`RequestSink`].

pub mod manager;
pub mod router;
pub mod state;

pub use {
    manager::SessionManager,
    router::{LookupRequest, MessageRouter, RequestSink},
    state::{Backoff, ReconnectPolicy, SessionHandle, SessionState},
};
