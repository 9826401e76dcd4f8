//! Live camera feeds and alert notifications that stay attached across
//! network failures.
//!
//! A [`CameraFeedSession`] keeps one camera view's MJPEG stream and metadata
//! socket alive; an [`AlertChannel`] keeps the application-wide alert socket
//! alive. Both retry forever with exponential backoff until torn down.

pub mod alerts;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod session;
pub mod stream;

pub use alerts::{AlertBook, AlertChannel, AlertCue, AlertEvent, SilentCue, TerminalBell};
pub use backoff::{BackoffConfig, BackoffError};
pub use channel::{ChannelStatus, ConnectionState, Reconnector, RetryState, RetryTimer};
pub use config::{Config, ConfigError, Endpoints};
pub use session::{merge_status, CameraFeedSession, FeedStatus};
pub use stream::{
    Detection, DetectionSnapshot, LiveFrame, MetadataView, StreamImageChannel,
    StreamMetadataChannel,
};
