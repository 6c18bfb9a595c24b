use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::error::Result;

// ── Connection lifecycle ────────────────────────────────────────────────────

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The account was signed out on the remote end. Not recoverable.
    LoggedOut,
    /// Anything else: network drop, server restart, stream failure. The
    /// optional status code is whatever the backend reported, for logging.
    Other(Option<u16>),
}

impl CloseReason {
    #[must_use]
    pub fn is_logged_out(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Connection lifecycle notifications, in the order a backend emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Connecting,
    Open,
    Closed(CloseReason),
}

// ── Messages ────────────────────────────────────────────────────────────────

/// Identifies one inbound message within its chat; reactions target this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub chat_id: String,
    pub id: String,
}

/// A message received from the chat client.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub key: MessageKey,
    /// Set when the bot itself authored the message (echoes from the
    /// backend's own sends).
    pub from_me: bool,
    /// Renderable text body, if the message has one.
    pub body: Option<String>,
}

/// Payload shapes the relay can send.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Text(String),
    Reaction { to: MessageKey, emoji: String },
    Image { bytes: Vec<u8>, caption: String },
    Document {
        bytes: Vec<u8>,
        filename: String,
        content_type: String,
    },
}

/// Events delivered by a live connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connection(ConnectionUpdate),
    /// The backend rotated its credentials; the consumer must call
    /// [`TransportConn::persist_credentials`] on the same connection.
    CredentialsRotated,
    Inbound(InboundMessage),
}

pub type EventReceiver = mpsc::Receiver<TransportEvent>;

// ── Traits ──────────────────────────────────────────────────────────────────

/// Factory for live connections. One implementation per chat backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection and hand back its event stream.
    ///
    /// Every call produces an independent connection; dropping the receiver
    /// detaches the caller from a dead connection so stale handles cannot
    /// deliver duplicate events.
    async fn connect(&self) -> Result<(Arc<dyn TransportConn>, EventReceiver)>;
}

/// A single live connection to the chat client.
#[async_trait]
pub trait TransportConn: Send + Sync {
    /// Whether this session already holds registered credentials.
    fn is_registered(&self) -> bool;

    /// Request a one-time pairing code for the given phone number.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// Send a payload to a chat.
    async fn send(&self, to: &str, payload: OutboundPayload) -> Result<()>;

    /// Persist rotated credentials. Called on
    /// [`TransportEvent::CredentialsRotated`]; the backend decides the format.
    async fn persist_credentials(&self) -> Result<()>;
}
