//! Console transport for local development.
//!
//! Each stdin line becomes an inbound message from the `console` chat;
//! outbound payloads are written to stdout. The connection reports
//! registered credentials and never closes, so the full session machinery
//! can be exercised without a chat backend.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::mpsc,
    },
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    plugin::{
        ConnectionUpdate, EventReceiver, InboundMessage, MessageKey, OutboundPayload, Transport,
        TransportConn, TransportEvent,
    },
};

const CONSOLE_CHAT_ID: &str = "console";

#[derive(Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn connect(&self) -> Result<(Arc<dyn TransportConn>, EventReceiver)> {
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let _ = tx
                .send(TransportEvent::Connection(ConnectionUpdate::Connecting))
                .await;
            let _ = tx
                .send(TransportEvent::Connection(ConnectionUpdate::Open))
                .await;

            let mut seq: u64 = 0;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let id = seq;
                        seq += 1;
                        let message = InboundMessage {
                            key: MessageKey {
                                chat_id: CONSOLE_CHAT_ID.into(),
                                id: id.to_string(),
                            },
                            from_me: false,
                            body: Some(line),
                        };
                        if tx.send(TransportEvent::Inbound(message)).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => {
                        debug!("console stdin closed");
                        break;
                    },
                    Err(e) => {
                        debug!(error = %e, "console stdin read failed");
                        break;
                    },
                }
            }
        });

        Ok((Arc::new(ConsoleConn), rx))
    }
}

struct ConsoleConn;

#[async_trait]
impl TransportConn for ConsoleConn {
    fn is_registered(&self) -> bool {
        true
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String> {
        Err(Error::Pairing("console transport has no pairing".into()))
    }

    async fn send(&self, to: &str, payload: OutboundPayload) -> Result<()> {
        match payload {
            OutboundPayload::Text(text) => println!("[{to}] {text}"),
            OutboundPayload::Reaction { emoji, .. } => println!("[{to}] reaction {emoji}"),
            OutboundPayload::Image { bytes, caption } => {
                println!("[{to}] image ({} bytes)\n{caption}", bytes.len());
            },
            OutboundPayload::Document {
                bytes,
                filename,
                content_type,
            } => {
                println!(
                    "[{to}] document {filename} ({content_type}, {} bytes)",
                    bytes.len()
                );
            },
        }
        Ok(())
    }

    async fn persist_credentials(&self) -> Result<()> {
        Ok(())
    }
}
