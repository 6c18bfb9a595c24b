use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {apkrelay_config::ReconnectConfig, tracing::debug};

/// Lifecycle of the single chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Open,
    Closing,
    LoggedOut,
}

/// Shared view of the session, handed to the router and request tasks.
///
/// State lives behind a std `Mutex`: every access is an instantaneous
/// read or write, never held across an `.await` point. The connect flag is
/// the reentrancy guard for connection attempts, distinct from the state
/// itself.
#[derive(Debug)]
pub struct SessionHandle {
    state: Mutex<SessionState>,
    connecting: AtomicBool,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            connecting: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, next: SessionState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::mem::replace(&mut *guard, next);
        if prev != next {
            debug!(?prev, ?next, "session state transition");
        }
    }

    /// Message processing is permitted only while the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.get() == SessionState::Open
    }

    /// Claim the right to drive a connection attempt.
    ///
    /// Returns `false` when an attempt is already in flight; the caller must
    /// then treat its own attempt as a no-op.
    pub fn begin_connect(&self) -> bool {
        !self.connecting.swap(true, Ordering::SeqCst)
    }

    /// Release the connection-attempt claim (opened, lost, or abandoned).
    pub fn end_connect(&self) {
        self.connecting.store(false, Ordering::SeqCst);
    }
}

/// What to do after a retryable connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Try again as attempt number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget exhausted; wait out the cooldown without incrementing
    /// the counter any further.
    Cooldown(Duration),
}

/// Bounded-backoff reconnection schedule.
///
/// Delay grows linearly with the attempt number up to a cap; once the
/// attempt budget is spent the schedule degrades to a fixed cooldown so a
/// prolonged outage never turns into a tight loop, yet the session still
/// recovers eventually.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    cap_delay: Duration,
    cooldown: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            cap_delay: Duration::from_millis(config.cap_delay_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }

    /// Plan the next reconnection given the attempts already spent.
    #[must_use]
    pub fn plan(&self, attempts_so_far: u32) -> Backoff {
        if attempts_so_far >= self.max_attempts {
            return Backoff::Cooldown(self.cooldown);
        }
        let attempt = attempts_so_far + 1;
        let delay = (self.base_delay * attempt).min(self.cap_delay);
        Backoff::Retry { attempt, delay }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(0, 1, 3_000)]
    #[case(1, 2, 6_000)]
    #[case(3, 4, 12_000)]
    #[case(4, 5, 15_000)] // hits the cap
    #[case(7, 8, 15_000)]
    #[case(9, 10, 15_000)]
    fn delay_grows_linearly_then_caps(
        #[case] spent: u32,
        #[case] expected_attempt: u32,
        #[case] expected_ms: u64,
    ) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.plan(spent), Backoff::Retry {
            attempt: expected_attempt,
            delay: Duration::from_millis(expected_ms),
        });
    }

    #[rstest]
    #[case(10)]
    #[case(11)]
    #[case(100)]
    fn exhausted_budget_cools_down_without_incrementing(#[case] spent: u32) {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.plan(spent),
            Backoff::Cooldown(Duration::from_millis(30_000))
        );
    }

    #[test]
    fn handle_starts_disconnected_and_gates_on_open() {
        let handle = SessionHandle::new();
        assert_eq!(handle.get(), SessionState::Disconnected);
        assert!(!handle.is_open());

        handle.set(SessionState::Open);
        assert!(handle.is_open());

        handle.set(SessionState::Closing);
        assert!(!handle.is_open());
    }

    #[test]
    fn connect_claim_is_exclusive_until_released() {
        let handle = SessionHandle::new();
        assert!(handle.begin_connect());
        assert!(!handle.begin_connect());

        handle.end_connect();
        assert!(handle.begin_connect());
    }
}
