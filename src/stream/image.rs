use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backoff::BackoffConfig;
use crate::channel::{ChannelStatus, ConnectionState, Reconnector, RetryTimer, Worker};
use crate::config::Endpoints;

use super::mjpeg::MjpegParser;

const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image stream ended")]
    StreamEnded,
}

#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub jpeg: Bytes,
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTarget {
    pub camera_id: String,
    pub overlay: bool,
    pub url: Url,
}

/// Retry bookkeeping for one image pull, independent of how the pull is done.
#[derive(Debug)]
pub struct ImageCore {
    endpoints: Endpoints,
    retry: Reconnector,
    target: Option<ImageTarget>,
}

impl ImageCore {
    pub fn new(endpoints: Endpoints, backoff: BackoffConfig) -> Self {
        Self {
            endpoints,
            retry: Reconnector::new(backoff),
            target: None,
        }
    }

    /// Points the resource at a camera and returns the first request URL.
    /// The first load never carries a cache-busting token.
    pub fn start(&mut self, camera_id: &str, overlay: bool) -> Url {
        if self.target.is_some() {
            self.stop();
        }

        let url = self.endpoints.image_url(camera_id, overlay);
        self.target = Some(ImageTarget {
            camera_id: camera_id.to_string(),
            overlay,
            url: url.clone(),
        });
        self.retry.begin();
        url
    }

    pub fn on_load_success(&mut self) {
        self.retry.opened();
    }

    pub fn on_load_failure(&mut self, reason: impl Into<String>) -> Option<RetryTimer> {
        if self.target.is_none() {
            return None;
        }
        self.retry.failed(reason)
    }

    /// Returns the cache-busted URL to request, or `None` when the timer is
    /// stale or the resource has been detached.
    pub fn on_retry_timer(&mut self, timer: RetryTimer, now_millis: i64) -> Option<Url> {
        let mut url = self.target.as_ref()?.url.clone();
        if !self.retry.fire(timer) {
            return None;
        }
        url.query_pairs_mut().append_pair("t", &now_millis.to_string());
        Some(url)
    }

    pub fn stop(&mut self) {
        self.retry.teardown();
        self.target = None;
    }

    pub fn target(&self) -> Option<&ImageTarget> {
        self.target.as_ref()
    }

    pub fn status(&self) -> ChannelStatus {
        self.retry.status()
    }
}

struct ImageDriver {
    core: ImageCore,
    client: reqwest::Client,
    camera_id: String,
    status: Arc<watch::Sender<ChannelStatus>>,
    frames: Arc<watch::Sender<Option<LiveFrame>>>,
    sequence: u64,
}

impl ImageDriver {
    async fn run(mut self, first_url: Url, cancel: CancellationToken) {
        self.publish();
        let mut url = first_url;

        loop {
            tracing::debug!(camera = %self.camera_id, url = %url, "requesting image stream");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.pull(&url) => result,
            };
            let error = outcome.err().unwrap_or(ImageError::StreamEnded);

            let Some(timer) = self.core.on_load_failure(error.to_string()) else {
                break;
            };
            self.publish();
            tracing::warn!(
                camera = %self.camera_id,
                error = %error,
                attempt = self.core.status().retry.attempt_count,
                delay_ms = timer.delay.as_millis() as u64,
                "image stream failed, retry scheduled"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(timer.delay) => {}
            }

            match self
                .core
                .on_retry_timer(timer, Utc::now().timestamp_millis())
            {
                Some(next) => url = next,
                None => break,
            }
            self.publish();
        }

        self.core.stop();
        self.publish();
        tracing::debug!(camera = %self.camera_id, "image stream detached");
    }

    /// Streams frames until the body ends (`Ok`) or the transport fails.
    async fn pull(&mut self, url: &Url) -> Result<(), ImageError> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let mut body = response.bytes_stream();
        let mut parser = MjpegParser::new(MAX_FRAME_BYTES);

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for jpeg in parser.push(&chunk) {
                if self.core.status().state != ConnectionState::Open {
                    self.core.on_load_success();
                    self.publish();
                    tracing::info!(camera = %self.camera_id, url = %url, "image stream loaded");
                }

                self.sequence += 1;
                self.frames.send_replace(Some(LiveFrame {
                    jpeg,
                    sequence: self.sequence,
                    received_at: Utc::now(),
                }));
            }
        }

        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(self.core.status());
    }
}

/// The live image pull for one camera view.
pub struct StreamImageChannel {
    client: reqwest::Client,
    endpoints: Endpoints,
    backoff: BackoffConfig,
    status: Arc<watch::Sender<ChannelStatus>>,
    frames: Arc<watch::Sender<Option<LiveFrame>>>,
    target: Option<(String, bool)>,
    worker: Option<Worker>,
}

impl StreamImageChannel {
    pub fn new(client: reqwest::Client, endpoints: Endpoints, backoff: BackoffConfig) -> Self {
        let (status, _) = watch::channel(ChannelStatus::idle(&backoff));
        let (frames, _) = watch::channel(None);
        Self {
            client,
            endpoints,
            backoff,
            status: Arc::new(status),
            frames: Arc::new(frames),
            target: None,
            worker: None,
        }
    }

    /// (Re)points the pull at `camera_id`. A different camera or overlay mode
    /// detaches the previous pull completely before the new request is made.
    pub async fn start(&mut self, camera_id: &str, overlay: bool) {
        let same_target = self
            .target
            .as_ref()
            .is_some_and(|(id, o)| id == camera_id && *o == overlay);
        if same_target && self.worker.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        self.stop().await;

        let mut core = ImageCore::new(self.endpoints.clone(), self.backoff);
        let url = core.start(camera_id, overlay);
        self.frames.send_replace(None);

        let driver = ImageDriver {
            core,
            client: self.client.clone(),
            camera_id: camera_id.to_string(),
            status: Arc::clone(&self.status),
            frames: Arc::clone(&self.frames),
            sequence: 0,
        };
        self.worker = Some(Worker::spawn(|cancel| driver.run(url, cancel)));
        self.target = Some((camera_id.to_string(), overlay));
    }

    /// Cancels any pending retry and detaches the stream. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        self.target = None;
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn frames(&self) -> watch::Receiver<Option<LiveFrame>> {
        self.frames.subscribe()
    }

    pub fn target(&self) -> Option<(&str, bool)> {
        self.target.as_ref().map(|(id, overlay)| (id.as_str(), *overlay))
    }
}
