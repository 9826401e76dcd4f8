use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;

use crate::backoff::BackoffConfig;
use crate::channel::{ChannelStatus, FrameHandler, Reconnector, SocketDriver, Worker};
use crate::config::Endpoints;

const UPSTREAM_RECONNECTING: &str = "reconnecting";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub center: Option<Vec<f64>>,
    #[serde(default)]
    pub area: Option<f64>,
}

/// Detections keyed by label, replaced wholesale by every update.
pub type DetectionSnapshot = BTreeMap<String, Vec<Detection>>;

#[derive(Debug, Deserialize)]
struct UpstreamStatus {
    #[serde(default)]
    stream_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    DetectionUpdate {
        #[serde(default)]
        camera_id: Option<String>,
        #[serde(default)]
        detections: Option<DetectionSnapshot>,
        #[serde(default)]
        status: Option<UpstreamStatus>,
    },
    Pong,
}

/// Latest metadata for one camera view.
///
/// `stream_reconnecting` reflects the backend's link to the camera, not
/// this client's socket, whose state lives in the channel status. It is
/// cleared whenever that socket is lost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataView {
    pub detections: DetectionSnapshot,
    pub stream_reconnecting: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

struct MetadataHandler {
    camera_id: String,
    view: Arc<watch::Sender<MetadataView>>,
}

impl FrameHandler for MetadataHandler {
    fn on_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<StreamMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(camera = %self.camera_id, error = %e, "dropping malformed metadata frame");
                return;
            }
        };

        match message {
            StreamMessage::DetectionUpdate {
                camera_id,
                detections,
                status,
            } => {
                if let Some(other) = camera_id.filter(|id| *id != self.camera_id) {
                    tracing::debug!(camera = %self.camera_id, other = %other, "ignoring update for another camera");
                    return;
                }

                let stream_reconnecting = status
                    .and_then(|s| s.stream_status)
                    .is_some_and(|s| s == UPSTREAM_RECONNECTING);

                let previous = self.view.send_replace(MetadataView {
                    detections: detections.unwrap_or_default(),
                    stream_reconnecting,
                    updated_at: Some(Utc::now()),
                });

                if previous.stream_reconnecting != stream_reconnecting {
                    tracing::info!(
                        camera = %self.camera_id,
                        stream_reconnecting,
                        "upstream camera status changed"
                    );
                }
            }
            StreamMessage::Pong => {}
        }
    }

    /// The upstream flag is only known while our own socket is up.
    fn on_lost(&mut self) {
        self.view
            .send_if_modified(|view| std::mem::replace(&mut view.stream_reconnecting, false));
    }
}

/// The per-camera metadata socket.
pub struct StreamMetadataChannel {
    endpoints: Endpoints,
    backoff: BackoffConfig,
    status: Arc<watch::Sender<ChannelStatus>>,
    view: Arc<watch::Sender<MetadataView>>,
    camera_id: Option<String>,
    worker: Option<Worker>,
}

impl StreamMetadataChannel {
    pub fn new(endpoints: Endpoints, backoff: BackoffConfig) -> Self {
        let (status, _) = watch::channel(ChannelStatus::idle(&backoff));
        let (view, _) = watch::channel(MetadataView::default());
        Self {
            endpoints,
            backoff,
            status: Arc::new(status),
            view: Arc::new(view),
            camera_id: None,
            worker: None,
        }
    }

    /// Opens the socket for `camera_id`. Reconnecting to the camera that is
    /// already attached is a no-op; any other camera replaces it.
    pub async fn connect(&mut self, camera_id: &str) {
        let attached = self.camera_id.as_deref() == Some(camera_id)
            && self.worker.as_ref().is_some_and(Worker::is_running);
        if attached {
            return;
        }

        self.disconnect().await;
        self.view.send_replace(MetadataView::default());

        let driver = SocketDriver::new(
            "metadata",
            self.endpoints.metadata_url(camera_id),
            Reconnector::new(self.backoff),
            MetadataHandler {
                camera_id: camera_id.to_string(),
                view: Arc::clone(&self.view),
            },
            Arc::clone(&self.status),
        );
        self.worker = Some(Worker::spawn(|cancel| driver.run(cancel)));
        self.camera_id = Some(camera_id.to_string());
    }

    /// Stops reconnecting and closes the socket. No reconnect is scheduled
    /// once this returns. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        self.camera_id = None;
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn view(&self) -> watch::Receiver<MetadataView> {
        self.view.subscribe()
    }

    pub fn camera_id(&self) -> Option<&str> {
        self.camera_id.as_deref()
    }
}
