use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

use {
    apkrelay_config::RelayConfig,
    apkrelay_transport::{InboundMessage, OutboundPayload, TransportConn},
};

use crate::state::SessionHandle;

/// One accepted lookup command.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub query: String,
    pub requester_id: String,
}

/// Executes accepted requests end to end; implemented by the pipeline.
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn dispatch(&self, conn: Arc<dyn TransportConn>, request: LookupRequest);
}

/// Substrings of transport diagnostics that occasionally surface as message
/// bodies; none of them represent user intent.
const DIAGNOSTIC_MARKERS: &[&str] = &["Session error", "decrypt"];

/// Acknowledgement reaction sent when a lookup is accepted.
const ACK_REACTION: &str = "\u{1F50D}";

/// Reserved prefix for future commands; such bodies are ignored.
const COMMAND_PREFIX: char = '/';

/// Classifies inbound messages and dispatches lookups.
///
/// Delivery is at-most-once: anything arriving while the session is not
/// open is dropped, never queued.
pub struct MessageRouter {
    session: Arc<SessionHandle>,
    sink: Arc<dyn RequestSink>,
    greetings: Vec<String>,
    welcome: String,
}

impl MessageRouter {
    #[must_use]
    pub fn new(session: Arc<SessionHandle>, sink: Arc<dyn RequestSink>, config: &RelayConfig) -> Self {
        Self {
            session,
            sink,
            greetings: config.greetings.clone(),
            welcome: welcome_text(config),
        }
    }

    /// Handle one inbound message: filter, classify, dispatch.
    pub async fn handle(&self, conn: Arc<dyn TransportConn>, message: InboundMessage) {
        if !self.session.is_open() {
            warn!("inbound message dropped, session not open");
            return;
        }
        if message.from_me {
            return;
        }
        let Some(body) = message.body.as_deref() else {
            debug!("ignoring message without a text body");
            return;
        };
        let body = body.trim();
        if body.is_empty() {
            return;
        }
        if DIAGNOSTIC_MARKERS.iter().any(|m| body.contains(m)) {
            debug!("ignoring transport diagnostic echo");
            return;
        }

        let requester = message.key.chat_id.clone();
        info!(from = %requester, "inbound message");

        let lowered = body.to_lowercase();
        if self.greetings.iter().any(|g| g.to_lowercase() == lowered) {
            if let Err(e) = conn
                .send(&requester, OutboundPayload::Text(self.welcome.clone()))
                .await
            {
                warn!(error = %e, "failed to send welcome message");
            }
            return;
        }

        if body.starts_with(COMMAND_PREFIX) {
            return;
        }

        // The session can drop between accepting the message and dispatch.
        if !self.session.is_open() {
            warn!("request abandoned, session dropped before dispatch");
            return;
        }

        let ack = OutboundPayload::Reaction {
            to: message.key.clone(),
            emoji: ACK_REACTION.into(),
        };
        if let Err(e) = conn.send(&requester, ack).await {
            warn!(error = %e, "acknowledgement reaction failed, abandoning request");
            return;
        }

        if !self.session.is_open() {
            warn!("request abandoned, session dropped after acknowledgement");
            return;
        }

        let request = LookupRequest {
            query: body.to_string(),
            requester_id: requester,
        };
        info!(query = %request.query, "dispatching lookup");
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.dispatch(conn, request).await;
        });
    }
}

fn welcome_text(config: &RelayConfig) -> String {
    let mut text = format!(
        "App download bot\n\n\
         Send an app name to fetch its installer.\n\
         Example: telegram, signal, firefox\n\n\
         Supports APK, XAPK and APKS up to {} MB.\n\n\
         Developer: {}",
        config.limits.max_artifact_mb as u64, config.attribution.name
    );
    if !config.attribution.instagram.is_empty() {
        text.push_str("\nInstagram: ");
        text.push_str(&config.attribution.instagram);
    }
    text.push_str(&format!("\n\n_by {}_", config.attribution.contact));
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::Mutex,
        time::Duration,
    };

    use apkrelay_transport::{MessageKey, Transport, memory::MemoryTransport};

    use {super::*, crate::state::SessionState};

    #[derive(Default)]
    struct RecordingSink {
        dispatched: Mutex<Vec<LookupRequest>>,
    }

    #[async_trait]
    impl RequestSink for RecordingSink {
        async fn dispatch(&self, _conn: Arc<dyn TransportConn>, request: LookupRequest) {
            self.dispatched
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request);
        }
    }

    fn message(body: Option<&str>) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                chat_id: "peer".into(),
                id: "1".into(),
            },
            from_me: false,
            body: body.map(str::to_string),
        }
    }

    fn setup(open: bool) -> (MessageRouter, Arc<RecordingSink>, MemoryTransport) {
        let session = Arc::new(SessionHandle::new());
        if open {
            session.set(SessionState::Open);
        }
        let sink = Arc::new(RecordingSink::default());
        let router = MessageRouter::new(
            session,
            Arc::clone(&sink) as Arc<dyn RequestSink>,
            &RelayConfig::default(),
        );
        (router, sink, MemoryTransport::new())
    }

    async fn settle() {
        // Dispatch happens on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn drops_everything_while_session_not_open() {
        let (router, sink, transport) = setup(false);
        let (conn, _rx) = transport.connect().await.unwrap();

        router.handle(Arc::clone(&conn), message(Some("telegram"))).await;
        settle().await;

        assert!(transport.sent().is_empty());
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn greeting_gets_welcome_and_no_dispatch() {
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();

        router.handle(Arc::clone(&conn), message(Some("HELLO"))).await;
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            OutboundPayload::Text(text) => assert!(text.contains("Send an app name")),
            other => panic!("expected welcome text, got {other:?}"),
        }
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_is_acknowledged_and_dispatched() {
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();

        router
            .handle(Arc::clone(&conn), message(Some("  telegram  ")))
            .await;
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, OutboundPayload::Reaction { .. }));

        let dispatched = sink.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].query, "telegram");
        assert_eq!(dispatched[0].requester_id, "peer");
    }

    #[tokio::test]
    async fn command_prefix_is_ignored() {
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();

        router.handle(Arc::clone(&conn), message(Some("/start"))).await;
        settle().await;

        assert!(transport.sent().is_empty());
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_messages_and_diagnostics_are_filtered() {
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();

        let mut own = message(Some("telegram"));
        own.from_me = true;
        router.handle(Arc::clone(&conn), own).await;
        router
            .handle(
                Arc::clone(&conn),
                message(Some("Session error: failed to decrypt message")),
            )
            .await;
        router.handle(Arc::clone(&conn), message(None)).await;
        settle().await;

        assert!(transport.sent().is_empty());
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_acknowledgement_abandons_request() {
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();
        transport.set_fail_sends(true);

        router.handle(Arc::clone(&conn), message(Some("telegram"))).await;
        settle().await;

        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_queries_both_dispatch() {
        // Concurrent identical queries are deliberately not de-duplicated.
        let (router, sink, transport) = setup(true);
        let (conn, _rx) = transport.connect().await.unwrap();

        router.handle(Arc::clone(&conn), message(Some("telegram"))).await;
        router.handle(Arc::clone(&conn), message(Some("telegram"))).await;
        settle().await;

        assert_eq!(sink.dispatched.lock().unwrap().len(), 2);
    }
}
