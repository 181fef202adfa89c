//! Video metadata.
//!
//! [`VideoMetadata`] is captured once when a source is opened and stays
//! fixed for the lifetime of the conversion.

use std::time::Duration;

use crate::utilities::expected_frame_count;

/// Metadata for the video stream of an opened source.
///
/// # Example
///
/// ```no_run
/// use vidgif::{FrameSource, VideoFile};
///
/// let video = VideoFile::open("input.mp4", 12)?;
/// let metadata = video.metadata();
/// println!("{}x{} for {:?}", metadata.width, metadata.height, metadata.duration);
/// # Ok::<(), vidgif::ConversionError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Native frame width in pixels.
    pub width: u32,
    /// Native frame height in pixels.
    pub height: u32,
    /// Total duration. [`Duration::ZERO`] when the container does not say.
    pub duration: Duration,
    /// Native frames per second (may be approximate for variable-frame-rate
    /// content, `0.0` if unknown).
    pub frames_per_second: f64,
    /// Codec name (e.g. `"h264"`, `"vp9"`).
    pub codec: String,
}

impl VideoMetadata {
    /// Estimated number of frames a conversion at `frame_rate` will emit.
    pub fn expected_frames(&self, frame_rate: u32) -> u64 {
        expected_frame_count(self.duration.as_secs_f64(), frame_rate)
    }
}
