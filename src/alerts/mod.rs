//! Process-wide alert notifications.
//!
//! One [`AlertChannel`] is created at startup and lives as long as the
//! application. Views observe it through [`AlertChannel::subscribe`]; only
//! the channel's own task ever writes to the [`AlertBook`].

mod book;
mod cue;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::backoff::BackoffConfig;
use crate::channel::{ChannelStatus, FrameHandler, Reconnector, SocketDriver, Worker};
use crate::config::Endpoints;

use book::AlertMessage;

pub use book::{AlertBook, AlertEvent};
pub use cue::{AlertCue, SilentCue, TerminalBell};

struct AlertHandler {
    book: Arc<watch::Sender<AlertBook>>,
    cue: Arc<dyn AlertCue>,
}

impl FrameHandler for AlertHandler {
    fn on_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<AlertMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed alert frame");
                return;
            }
        };

        if let AlertMessage::AlertEnded { alert_id } = &message {
            tracing::info!(alert = %alert_id, "alert ended");
        }

        let mut created = None;
        self.book.send_modify(|book| created = book.apply(message, Utc::now()));

        if let Some(alert) = created {
            tracing::info!(
                alert = %alert.id,
                camera = %alert.camera_id,
                rule = %alert.rule_name,
                "alert triggered"
            );
            self.cue.play(&alert);
        }
    }
}

pub struct AlertChannel {
    url: String,
    backoff: BackoffConfig,
    cue: Arc<dyn AlertCue>,
    status: Arc<watch::Sender<ChannelStatus>>,
    book: Arc<watch::Sender<AlertBook>>,
    worker: Option<Worker>,
}

impl AlertChannel {
    pub fn new(
        endpoints: &Endpoints,
        backoff: BackoffConfig,
        history_limit: usize,
        cue: Arc<dyn AlertCue>,
    ) -> Self {
        let (status, _) = watch::channel(ChannelStatus::idle(&backoff));
        let (book, _) = watch::channel(AlertBook::new(history_limit));
        Self {
            url: endpoints.alerts_url(),
            backoff,
            cue,
            status: Arc::new(status),
            book: Arc::new(book),
            worker: None,
        }
    }

    /// Starts the socket. Calling it again while the channel is running,
    /// open or retrying, does nothing.
    pub fn connect(&mut self) {
        if self.worker.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        let driver = SocketDriver::new(
            "alerts",
            self.url.clone(),
            Reconnector::new(self.backoff),
            AlertHandler {
                book: Arc::clone(&self.book),
                cue: Arc::clone(&self.cue),
            },
            Arc::clone(&self.status),
        );
        self.worker = Some(Worker::spawn(|cancel| driver.run(cancel)));
    }

    /// Permanently stops reconnection until the next [`connect`](Self::connect).
    /// Active alerts and history are kept.
    pub async fn disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AlertBook> {
        self.book.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCue(AtomicUsize);

    impl AlertCue for CountingCue {
        fn play(&self, _alert: &AlertEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handler() -> (AlertHandler, watch::Receiver<AlertBook>, Arc<CountingCue>) {
        let (tx, rx) = watch::channel(AlertBook::new(100));
        let cue = Arc::new(CountingCue::default());
        let handler = AlertHandler {
            book: Arc::new(tx),
            cue: cue.clone(),
        };
        (handler, rx, cue)
    }

    #[test]
    fn test_alert_lifecycle_frames() {
        let (mut h, rx, cue) = handler();

        h.on_text(
            r#"{"type":"alert_triggered","alert_id":"a1","rule_id":"r1","rule_name":"Door",
                "camera_id":"cam-1","message":"person at door","confidence":0.9,"detected_objects":[]}"#,
        );
        assert!(rx.borrow().is_active("a1"));
        assert_eq!(cue.0.load(Ordering::SeqCst), 1);

        h.on_text(r#"{"type":"alert_ended","alert_id":"a1","rule_id":"r1"}"#);
        h.on_text(r#"{"type":"ping"}"#);

        let book = rx.borrow();
        assert!(book.active().is_empty());
        assert_eq!(book.latest().unwrap().id, "a1");
        assert_eq!(cue.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cue_once_per_trigger() {
        let (mut h, _rx, cue) = handler();
        let frame = r#"{"type":"alert_triggered","alert_id":"a1","rule_id":"r1","rule_name":"Door","camera_id":"cam-1"}"#;
        h.on_text(frame);
        h.on_text(frame);
        h.on_text(r#"{"type":"ping"}"#);
        assert_eq!(cue.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_malformed_alert_frames_are_dropped() {
        let (mut h, rx, cue) = handler();
        h.on_text("{");
        h.on_text(r#"{"type":"alert_triggered","alert_id":"a1"}"#);
        h.on_text(r#"{"type":"alert_snoozed","alert_id":"a1"}"#);
        h.on_text(r#"{"alert_id":"a1"}"#);

        assert_eq!(rx.borrow().history_len(), 0);
        assert_eq!(cue.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_disconnect_closes() {
        // nothing listens on port 9; attempts fail and retry until teardown
        let endpoints = Endpoints::new("http://127.0.0.1:9", None).unwrap();
        let mut channel = AlertChannel::new(
            &endpoints,
            BackoffConfig {
                initial_delay_ms: 10,
                backoff_factor: 1.5,
                max_delay_ms: 50,
            },
            100,
            Arc::new(SilentCue),
        );

        channel.connect();
        channel.connect();
        channel.disconnect().await;
        channel.disconnect().await;

        let status = channel.status().borrow().clone();
        assert_eq!(status.state, crate::channel::ConnectionState::Closed);
        assert!(!status.retry.should_retry);
    }
}
