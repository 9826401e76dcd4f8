mod image;
mod metadata;
mod mjpeg;

pub use image::{ImageCore, ImageError, ImageTarget, LiveFrame, StreamImageChannel};
pub use metadata::{Detection, DetectionSnapshot, MetadataView, StreamMetadataChannel};
pub use mjpeg::MjpegParser;
