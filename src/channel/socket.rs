use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{ChannelStatus, Reconnector};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interprets the text frames of one server-push socket.
pub(crate) trait FrameHandler: Send + 'static {
    fn on_text(&mut self, text: &str);

    /// Called once an open socket ends, before any retry is published.
    fn on_lost(&mut self) {}
}

/// Keeps one websocket attached until its token is cancelled.
pub(crate) struct SocketDriver<H> {
    channel: &'static str,
    url: String,
    retry: Reconnector,
    handler: H,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl<H: FrameHandler> SocketDriver<H> {
    pub(crate) fn new(
        channel: &'static str,
        url: String,
        retry: Reconnector,
        handler: H,
        status: Arc<watch::Sender<ChannelStatus>>,
    ) -> Self {
        Self {
            channel,
            url,
            retry,
            handler,
            status,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        if !self.retry.begin() {
            return;
        }
        self.publish();

        loop {
            tracing::debug!(channel = self.channel, url = %self.url, "connecting socket");

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };

            let reason = match connected {
                Ok((socket, _)) => {
                    self.retry.opened();
                    self.publish();
                    tracing::info!(channel = self.channel, url = %self.url, "socket open");

                    let lost = self.pump(socket, &cancel).await;
                    self.handler.on_lost();
                    match lost {
                        Some(reason) => reason,
                        None => break,
                    }
                }
                Err(e) => e.to_string(),
            };

            let Some(timer) = self.retry.failed(reason.as_str()) else {
                break;
            };
            self.publish();
            tracing::warn!(
                channel = self.channel,
                url = %self.url,
                error = %reason,
                attempt = self.retry.attempt_count(),
                delay_ms = timer.delay.as_millis() as u64,
                "socket lost, reconnect scheduled"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(timer.delay) => {}
            }

            if !self.retry.fire(timer) {
                break;
            }
            self.publish();
        }

        self.retry.teardown();
        self.publish();
        tracing::info!(channel = self.channel, url = %self.url, "socket closed");
    }

    /// Reads frames until the transport fails (returning why) or teardown is
    /// requested (returning `None`).
    async fn pump(&mut self, socket: Socket, cancel: &CancellationToken) -> Option<String> {
        let (mut write, mut read) = socket.split();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(None))).await;
                    return None;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handler.on_text(text.as_str()),
                    // raw JPEG frames share the socket; only JSON is ours
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => format!("closed by server (code {})", u16::from(f.code)),
                            None => "closed by server".to_string(),
                        };
                        // reading on flushes the queued close reply until the server hangs up
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                            while let Some(Ok(_)) = read.next().await {}
                        })
                        .await;
                        return Some(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("connection ended".to_string()),
                }
            }
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.retry.status());
    }
}
