//! In-memory transport for tests.
//!
//! Events are scripted by the test through [`MemoryTransport::push`]; every
//! payload sent on a connection is recorded for later assertions, along with
//! counters for connects, pairing-code requests, and credential persists.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::{Error, Result},
    plugin::{EventReceiver, OutboundPayload, Transport, TransportConn, TransportEvent},
};

#[derive(Default)]
struct Shared {
    registered: AtomicBool,
    fail_sends: AtomicBool,
    fail_documents: AtomicBool,
    connects: AtomicUsize,
    pairing_requests: AtomicUsize,
    persists: AtomicUsize,
    sent: Mutex<Vec<(String, OutboundPayload)>>,
    /// Sender for the most recent connection's event stream. Replaced on
    /// every `connect`, which ends the previous connection's stream.
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

/// Scriptable transport backed by channels and counters.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// New transport reporting registered credentials; flip with
    /// [`Self::set_registered`] to exercise pairing flows.
    #[must_use]
    pub fn new() -> Self {
        let t = Self::default();
        t.shared.registered.store(true, Ordering::SeqCst);
        t
    }

    /// Whether connections report registered credentials.
    pub fn set_registered(&self, registered: bool) {
        self.shared.registered.store(registered, Ordering::SeqCst);
    }

    /// Make every subsequent `send` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make only document sends fail (text, reactions, and images pass).
    pub fn set_fail_documents(&self, fail: bool) {
        self.shared.fail_documents.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event on the most recent connection's stream.
    ///
    /// Returns `false` if no connection is live or the receiver was dropped.
    pub async fn push(&self, event: TransportEvent) -> bool {
        let tx = {
            let guard = self.shared.events.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Snapshot of every `(to, payload)` sent so far, across connections.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pairing_request_count(&self) -> usize {
        self.shared.pairing_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn persist_count(&self) -> usize {
        self.shared.persists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(Arc<dyn TransportConn>, EventReceiver)> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        {
            let mut guard = self.shared.events.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(tx);
        }
        let conn = MemoryConn {
            shared: Arc::clone(&self.shared),
        };
        Ok((Arc::new(conn), rx))
    }
}

struct MemoryConn {
    shared: Arc<Shared>,
}

#[async_trait]
impl TransportConn for MemoryConn {
    fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String> {
        self.shared.pairing_requests.fetch_add(1, Ordering::SeqCst);
        Ok("TEST-CODE".into())
    }

    async fn send(&self, to: &str, payload: OutboundPayload) -> Result<()> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Send("memory transport set to fail".into()));
        }
        if self.shared.fail_documents.load(Ordering::SeqCst)
            && matches!(payload, OutboundPayload::Document { .. })
        {
            return Err(Error::Send("memory transport set to fail documents".into()));
        }
        self.shared
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((to.to_string(), payload));
        Ok(())
    }

    async fn persist_credentials(&self) -> Result<()> {
        self.shared.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
