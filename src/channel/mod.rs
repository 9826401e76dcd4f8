//! Reconnection state shared by every live channel.
//!
//! A [`Reconnector`] holds the whole transition table for one channel
//! (`idle → connecting → open → retrying → closed`) and is driven purely by
//! events handed to it by the task that owns the transport. It never touches
//! the network or the clock itself.

mod socket;

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{self, BackoffConfig};

pub(crate) use socket::{FrameHandler, SocketDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Retrying,
    Closed,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub next_delay_ms: u64,
    pub should_retry: bool,
}

/// Snapshot of one channel as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub retry: RetryState,
    pub last_error: Option<String>,
}

impl ChannelStatus {
    pub fn idle(backoff: &BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            retry: RetryState {
                attempt_count: 0,
                next_delay_ms: backoff::delay_ms(0, backoff),
                should_retry: true,
            },
            last_error: None,
        }
    }
}

/// Handle to the single retry timer a channel may have outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimer {
    id: u64,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct Reconnector {
    backoff: BackoffConfig,
    state: ConnectionState,
    attempt_count: u32,
    next_delay_ms: u64,
    should_retry: bool,
    pending: Option<u64>,
    timer_seq: u64,
    last_error: Option<String>,
}

impl Reconnector {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            state: ConnectionState::Idle,
            attempt_count: 0,
            next_delay_ms: backoff::delay_ms(0, &backoff),
            should_retry: true,
            pending: None,
            timer_seq: 0,
            last_error: None,
        }
    }

    /// Starts a fresh connection cycle from `Idle` or `Closed`.
    ///
    /// Returns `false` while an attempt is in flight, open, or waiting on a
    /// retry timer, so at most one connect is ever outstanding.
    pub fn begin(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Retrying => {
                false
            }
            ConnectionState::Idle | ConnectionState::Closed => {
                self.should_retry = true;
                self.attempt_count = 0;
                self.next_delay_ms = backoff::delay_ms(0, &self.backoff);
                self.pending = None;
                self.last_error = None;
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    pub fn opened(&mut self) {
        if !self.should_retry {
            return;
        }
        self.state = ConnectionState::Open;
        self.attempt_count = 0;
        self.next_delay_ms = backoff::delay_ms(0, &self.backoff);
        self.pending = None;
        self.last_error = None;
    }

    /// Records a transport failure and schedules the next attempt.
    ///
    /// Any timer still pending is superseded by the returned one. After
    /// teardown nothing is scheduled and the channel settles in `Closed`.
    pub fn failed(&mut self, reason: impl Into<String>) -> Option<RetryTimer> {
        self.last_error = Some(reason.into());

        if !self.should_retry {
            self.pending = None;
            self.state = ConnectionState::Closed;
            return None;
        }

        let delay_ms = backoff::delay_ms(self.attempt_count, &self.backoff);
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.next_delay_ms = delay_ms;
        self.timer_seq += 1;
        self.pending = Some(self.timer_seq);
        self.state = ConnectionState::Retrying;

        Some(RetryTimer {
            id: self.timer_seq,
            delay: Duration::from_millis(delay_ms),
        })
    }

    /// Consumes a fired timer. Stale timers and timers that fire after
    /// teardown are ignored and leave every field untouched.
    pub fn fire(&mut self, timer: RetryTimer) -> bool {
        if !self.should_retry || self.pending != Some(timer.id) {
            return false;
        }
        self.pending = None;
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn teardown(&mut self) {
        self.should_retry = false;
        self.pending = None;
        self.state = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn has_pending_timer(&self) -> bool {
        self.pending.is_some()
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            state: self.state,
            retry: RetryState {
                attempt_count: self.attempt_count,
                next_delay_ms: self.next_delay_ms,
                should_retry: self.should_retry,
            },
            last_error: self.last_error.clone(),
        }
    }
}

/// A spawned channel task plus the token that tears it down.
pub(crate) struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        Self { cancel, handle }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the task and waits until it has released its transport.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                tracing::error!(error = %e, "channel task panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1000,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut r = Reconnector::new(fast());
        assert_eq!(r.state(), ConnectionState::Idle);

        assert!(r.begin());
        assert_eq!(r.state(), ConnectionState::Connecting);
        assert!(!r.begin(), "second connect while one is in flight");

        r.opened();
        assert_eq!(r.state(), ConnectionState::Open);
        assert!(!r.begin());
    }

    #[test]
    fn test_attempts_grow_then_reset_on_open() {
        let mut r = Reconnector::new(fast());
        r.begin();

        let delays: Vec<u64> = (0..4)
            .map(|_| {
                let timer = r.failed("refused").unwrap();
                assert!(r.fire(timer));
                timer.delay.as_millis() as u64
            })
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
        assert_eq!(r.attempt_count(), 4);

        r.opened();
        assert_eq!(r.attempt_count(), 0);
        assert_eq!(r.status().last_error, None);

        let timer = r.failed("reset by peer").unwrap();
        assert_eq!(timer.delay, Duration::from_millis(100));
        assert_eq!(r.state(), ConnectionState::Retrying);
        assert_eq!(r.status().last_error.as_deref(), Some("reset by peer"));
    }

    #[test]
    fn test_timer_after_teardown_is_noop() {
        let mut r = Reconnector::new(fast());
        r.begin();
        let timer = r.failed("refused").unwrap();
        assert!(r.has_pending_timer());

        r.teardown();
        let before = r.status();
        assert!(!r.fire(timer));
        assert_eq!(r.status(), before);
        assert_eq!(r.state(), ConnectionState::Closed);
        assert!(!r.status().retry.should_retry);
    }

    #[test]
    fn test_newer_timer_supersedes_pending_one() {
        let mut r = Reconnector::new(fast());
        r.begin();
        let first = r.failed("refused").unwrap();
        let second = r.failed("refused again").unwrap();

        assert!(!r.fire(first));
        assert_eq!(r.state(), ConnectionState::Retrying);
        assert!(r.fire(second));
        assert_eq!(r.state(), ConnectionState::Connecting);
        assert!(!r.fire(second), "a timer fires at most once");
    }

    #[test]
    fn test_failure_after_teardown_closes() {
        let mut r = Reconnector::new(fast());
        r.begin();
        r.opened();
        r.teardown();

        assert!(r.failed("socket closed").is_none());
        assert_eq!(r.state(), ConnectionState::Closed);
        assert!(!r.has_pending_timer());

        r.opened();
        assert_eq!(r.state(), ConnectionState::Closed, "late open is ignored");
    }

    #[test]
    fn test_begin_rearms_after_teardown() {
        let mut r = Reconnector::new(fast());
        r.begin();
        r.failed("refused");
        r.failed("refused");
        r.teardown();

        assert!(r.begin());
        let status = r.status();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.retry.attempt_count, 0);
        assert!(status.retry.should_retry);
        assert_eq!(status.last_error, None);
    }
}
