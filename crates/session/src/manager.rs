use std::sync::Arc;

use {
    secrecy::{ExposeSecret, Secret},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    apkrelay_config::RelayConfig,
    apkrelay_transport::{
        ConnectionUpdate, EventReceiver, Transport, TransportConn, TransportEvent,
    },
};

use crate::{
    router::MessageRouter,
    state::{Backoff, ReconnectPolicy, SessionHandle, SessionState},
};

/// How one live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnOutcome {
    /// The remote side signed the account out. Terminal.
    LoggedOut,
    /// Retryable loss: closed event, stream end, or connect failure.
    Lost,
    /// Shutdown was requested through the cancellation token.
    Cancelled,
}

/// Drives the session: connect, pair, route events, reconnect with bounded
/// backoff, stop for good on logout.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    session: Arc<SessionHandle>,
    router: Arc<MessageRouter>,
    policy: ReconnectPolicy,
    phone_number: Option<Secret<String>>,
    /// Retryable disconnects since the last open session.
    attempts: u32,
    /// True once a pairing code was requested for the current
    /// unauthenticated session; cleared when a registered session opens.
    pairing_requested: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionHandle>,
        router: Arc<MessageRouter>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            transport,
            session,
            router,
            policy: ReconnectPolicy::new(&config.reconnect),
            phone_number: config.phone_number.clone(),
            attempts: 0,
            pairing_requested: false,
        }
    }

    /// Run the session until the account is logged out or `cancel` fires.
    ///
    /// Reentrant-safe: a second call while a connection attempt is in
    /// flight returns immediately without touching the schedule.
    pub async fn run(&mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            if !self.session.begin_connect() {
                warn!("connection attempt already in flight, ignoring start");
                return Ok(());
            }

            let outcome = match self.transport.connect().await {
                Ok((conn, rx)) => self.drive(conn, rx, &cancel).await,
                Err(e) => {
                    warn!(error = %e, "transport connect failed");
                    self.session.set(SessionState::Disconnected);
                    ConnOutcome::Lost
                },
            };
            // Cleared before any reconnect is scheduled; the event receiver
            // for the dead connection was dropped when `drive` returned, so
            // stale handles cannot deliver duplicate events.
            self.session.end_connect();

            match outcome {
                ConnOutcome::LoggedOut => {
                    error!("account logged out, shutting down");
                    return Ok(());
                },
                ConnOutcome::Cancelled => {
                    info!("shutdown requested");
                    self.session.set(SessionState::Closing);
                    return Ok(());
                },
                ConnOutcome::Lost => {},
            }

            let delay = match self.policy.plan(self.attempts) {
                Backoff::Retry { attempt, delay } => {
                    self.attempts = attempt;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connection lost, reconnecting"
                    );
                    delay
                },
                Backoff::Cooldown(delay) => {
                    error!(
                        delay_ms = delay.as_millis() as u64,
                        "reconnect attempts exhausted, cooling down"
                    );
                    delay
                },
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    self.session.set(SessionState::Closing);
                    return Ok(());
                },
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Consume one connection's event stream until it dies or shutdown.
    async fn drive(
        &mut self,
        conn: Arc<dyn TransportConn>,
        mut rx: EventReceiver,
        cancel: &CancellationToken,
    ) -> ConnOutcome {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return ConnOutcome::Cancelled,
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => {
                        warn!("event stream ended without a close event");
                        self.session.set(SessionState::Disconnected);
                        return ConnOutcome::Lost;
                    },
                },
            };

            match event {
                TransportEvent::Connection(update) => {
                    self.maybe_request_pairing(conn.as_ref()).await;
                    match update {
                        ConnectionUpdate::Connecting => {
                            info!("connecting");
                            self.session.set(SessionState::Connecting);
                        },
                        ConnectionUpdate::Open => {
                            self.session.set(SessionState::Open);
                            self.attempts = 0;
                            self.session.end_connect();
                            if conn.is_registered() {
                                self.pairing_requested = false;
                            }
                            info!("session open");
                        },
                        ConnectionUpdate::Closed(reason) => {
                            self.session.set(SessionState::Closing);
                            if reason.is_logged_out() {
                                self.session.set(SessionState::LoggedOut);
                                return ConnOutcome::LoggedOut;
                            }
                            warn!(?reason, "connection closed");
                            self.session.set(SessionState::Disconnected);
                            return ConnOutcome::Lost;
                        },
                    }
                },
                TransportEvent::CredentialsRotated => {
                    debug!("persisting rotated credentials");
                    if let Err(e) = conn.persist_credentials().await {
                        warn!(error = %e, "failed to persist rotated credentials");
                    }
                },
                TransportEvent::Inbound(message) => {
                    let router = Arc::clone(&self.router);
                    let conn = Arc::clone(&conn);
                    tokio::spawn(async move {
                        router.handle(conn, message).await;
                    });
                },
            }
        }
    }

    /// Request a pairing code once per unauthenticated session.
    async fn maybe_request_pairing(&mut self, conn: &dyn TransportConn) {
        if conn.is_registered() || self.pairing_requested {
            return;
        }
        // Set before anything can fail so repeated connection updates from
        // the same session never trigger a second request.
        self.pairing_requested = true;

        info!("session is unauthenticated, starting pairing");
        let phone = match self.phone_number.clone() {
            Some(phone) => Some(phone),
            None => prompt_phone_number().await,
        };
        let Some(phone) = phone else {
            error!("phone number required for pairing, waiting for configuration");
            return;
        };

        let digits: String = phone
            .expose_secret()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.is_empty() {
            error!("phone number contains no digits, waiting for configuration");
            return;
        }

        self.session.set(SessionState::AwaitingPairing);
        match conn.request_pairing_code(&digits).await {
            Ok(code) => {
                println!("\n{}", "=".repeat(50));
                println!("  PAIRING CODE: {code}");
                println!("{}\n", "=".repeat(50));
                info!("enter the code under linked devices on your phone");
            },
            Err(e) => {
                warn!(error = %e, "pairing code request failed");
            },
        }
    }
}

/// Ask for the phone number on the terminal. Returns `None` on empty input
/// or a closed stdin.
async fn prompt_phone_number() -> Option<Secret<String>> {
    let input = tokio::task::spawn_blocking(|| {
        use std::io::{BufRead, Write};

        print!("Enter the phone number to pair (with country code): ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let line = line.trim().to_string();
        if line.is_empty() { None } else { Some(line) }
    })
    .await
    .ok()
    .flatten()?;
    Some(Secret::new(input))
}
