use std::fmt;

use tokio::sync::watch;

use crate::channel::{ChannelStatus, ConnectionState};
use crate::config::{Endpoints, ReconnectConfig};
use crate::stream::{LiveFrame, MetadataView, StreamImageChannel, StreamMetadataChannel};

/// What a camera view shows, merged from both of its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Connecting,
    Live,
    /// The metadata socket to the backend is down.
    Offline,
    /// The image stream from the backend is failing.
    StreamUnavailable,
    /// The backend reports its own link to the camera is reconnecting.
    CameraReconnecting,
}

impl FeedStatus {
    pub fn label(self) -> &'static str {
        match self {
            FeedStatus::Idle => "Idle",
            FeedStatus::Connecting => "Connecting",
            FeedStatus::Live => "Live",
            FeedStatus::Offline => "Offline",
            FeedStatus::StreamUnavailable => "Stream unavailable",
            FeedStatus::CameraReconnecting => "Reconnecting",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reads both channels' snapshots into one status. Upstream camera trouble
/// outranks local transport trouble, which outranks a healthy feed.
pub fn merge_status(
    image: &ChannelStatus,
    metadata: &ChannelStatus,
    upstream_reconnecting: bool,
) -> FeedStatus {
    use ConnectionState::*;

    let stopped = |s: ConnectionState| matches!(s, Idle | Closed);
    if stopped(image.state) && stopped(metadata.state) {
        return FeedStatus::Idle;
    }

    if upstream_reconnecting {
        return FeedStatus::CameraReconnecting;
    }
    if image.state == Retrying {
        return FeedStatus::StreamUnavailable;
    }
    if metadata.state == Retrying {
        return FeedStatus::Offline;
    }
    if image.state == Open && metadata.state == Open {
        FeedStatus::Live
    } else {
        FeedStatus::Connecting
    }
}

/// The image and metadata channels behind one camera view.
pub struct CameraFeedSession {
    image: StreamImageChannel,
    metadata: StreamMetadataChannel,
    image_status: watch::Receiver<ChannelStatus>,
    metadata_status: watch::Receiver<ChannelStatus>,
    view: watch::Receiver<MetadataView>,
    current: Option<(String, bool)>,
}

impl CameraFeedSession {
    pub fn new(client: reqwest::Client, endpoints: Endpoints, reconnect: &ReconnectConfig) -> Self {
        let image = StreamImageChannel::new(client, endpoints.clone(), reconnect.image);
        let metadata = StreamMetadataChannel::new(endpoints, reconnect.socket);
        Self {
            image_status: image.status(),
            metadata_status: metadata.status(),
            view: metadata.view(),
            image,
            metadata,
            current: None,
        }
    }

    /// Attaches the view to `camera_id`. Any change of camera or overlay mode
    /// tears the previous pair down completely before the new pair starts.
    pub async fn start(&mut self, camera_id: &str, overlay: bool) {
        let unchanged = self
            .current
            .as_ref()
            .is_some_and(|(id, o)| id == camera_id && *o == overlay);
        if unchanged {
            return;
        }

        self.stop().await;

        tracing::info!(camera = %camera_id, overlay, "starting feed session");
        self.image.start(camera_id, overlay).await;
        self.metadata.connect(camera_id).await;
        self.current = Some((camera_id.to_string(), overlay));
    }

    pub async fn stop(&mut self) {
        let Some((camera_id, _)) = self.current.take() else {
            return;
        };
        tokio::join!(self.image.stop(), self.metadata.disconnect());
        tracing::info!(camera = %camera_id, "feed session stopped");
    }

    pub fn status(&self) -> FeedStatus {
        let upstream_reconnecting = self.view.borrow().stream_reconnecting;
        merge_status(
            &self.image_status.borrow(),
            &self.metadata_status.borrow(),
            upstream_reconnecting,
        )
    }

    pub fn camera_id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn overlay(&self) -> bool {
        self.current.as_ref().is_some_and(|(_, overlay)| *overlay)
    }

    pub fn image_status(&self) -> watch::Receiver<ChannelStatus> {
        self.image.status()
    }

    pub fn metadata_status(&self) -> watch::Receiver<ChannelStatus> {
        self.metadata.status()
    }

    pub fn frames(&self) -> watch::Receiver<Option<LiveFrame>> {
        self.image.frames()
    }

    pub fn metadata(&self) -> watch::Receiver<MetadataView> {
        self.metadata.view()
    }
}
