//! Transport abstraction over the chat client.
//!
//! The wire protocol (handshake, encryption, device pairing crypto) lives
//! outside this workspace; a backend integrates by implementing the
//! [`Transport`] and [`TransportConn`] traits. Two implementations ship
//! here: an in-memory transport for tests and a console transport for
//! local development.

pub mod console;
pub mod error;
pub mod memory;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{
        CloseReason, ConnectionUpdate, EventReceiver, InboundMessage, MessageKey, OutboundPayload,
        Transport, TransportConn, TransportEvent,
    },
};
