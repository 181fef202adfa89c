//! Frame sources.
//!
//! A [`FrameSource`] yields decoded RGB frames in strict temporal order,
//! already resampled to the output frame rate. [`VideoFile`] is the
//! FFmpeg-backed implementation: it decodes lazily, one packet at a time, so
//! only the current and the next decoded frame are held in memory.
//!
//! # Example
//!
//! ```no_run
//! use vidgif::{FrameSource, VideoFile};
//!
//! let mut video = VideoFile::open("input.mp4", 12)?;
//! let mut count = 0;
//! while let Some(frame) = video.next_frame()? {
//!     count += 1;
//!     assert_eq!(frame.width(), video.metadata().width);
//! }
//! println!("{count} frames at 12 fps");
//! # Ok::<(), vidgif::ConversionError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::error::ConversionError;
use crate::metadata::VideoMetadata;
use crate::utilities::{Pull, frame_to_rgb_buffer, pts_to_seconds, pull_outcome, rational_to_fps};

/// Slack when comparing decoded timestamps against output sample times.
const TIMESTAMP_EPSILON: f64 = 1e-6;

/// A forward-only, finite sequence of decoded frames.
///
/// Sources are not restartable; open a new one to iterate again.
pub trait FrameSource {
    /// Metadata captured when the source was opened.
    fn metadata(&self) -> &VideoMetadata;

    /// The next frame, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Decode`] if a frame cannot be extracted.
    /// The sequence must not be polled again after an error.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, ConversionError>;
}

/// Picks output frames from a native-rate stream of timestamped frames.
///
/// Output frame `k` is the last input frame shown at or before `k / fps`
/// seconds, measured from the first input frame. Frames are dropped when the
/// output rate is lower than the native rate and repeated when it is higher.
#[derive(Debug)]
pub(crate) struct Resampler {
    frame_rate: f64,
    duration: Option<f64>,
    emitted: u64,
    origin: Option<f64>,
    held: Option<(f64, RgbImage)>,
    lookahead: Option<(f64, RgbImage)>,
    exhausted: bool,
    finished: bool,
}

impl Resampler {
    /// `duration` of zero means unknown: emission then stops after the last
    /// input frame's timestamp.
    pub(crate) fn new(frame_rate: u32, duration: Duration) -> Self {
        let seconds = duration.as_secs_f64();
        Self {
            frame_rate: frame_rate.max(1) as f64,
            duration: (seconds > 0.0).then_some(seconds),
            emitted: 0,
            origin: None,
            held: None,
            lookahead: None,
            exhausted: false,
            finished: false,
        }
    }

    /// Produce the next output frame, pulling input frames from `pull` as
    /// needed. `pull` returns `(seconds, frame)` in presentation order, or
    /// `None` when the input is drained.
    pub(crate) fn next<F>(&mut self, mut pull: F) -> Result<Option<RgbImage>, ConversionError>
    where
        F: FnMut() -> Result<Option<(f64, RgbImage)>, ConversionError>,
    {
        if self.finished {
            return Ok(None);
        }

        let target = self.emitted as f64 / self.frame_rate;
        if let Some(duration) = self.duration {
            if target >= duration - TIMESTAMP_EPSILON {
                self.finished = true;
                return Ok(None);
            }
        }

        loop {
            if self.lookahead.is_none() && !self.exhausted {
                match pull()? {
                    Some((seconds, frame)) => {
                        let origin = *self.origin.get_or_insert(seconds);
                        self.lookahead = Some((seconds - origin, frame));
                    }
                    None => self.exhausted = true,
                }
            }

            match self.lookahead.take() {
                Some((seconds, frame)) => {
                    if self.held.is_some() && seconds > target + TIMESTAMP_EPSILON {
                        self.lookahead = Some((seconds, frame));
                        break;
                    }
                    self.held = Some((seconds, frame));
                }
                None => break,
            }
        }

        match &self.held {
            None => {
                self.finished = true;
                Ok(None)
            }
            Some((seconds, _)) if self.exhausted && self.duration.is_none() => {
                // Unknown duration: the last frame is shown for one output
                // interval past its timestamp.
                let last_interval_end = seconds + 1.0 / self.frame_rate;
                if target >= last_interval_end - TIMESTAMP_EPSILON {
                    self.finished = true;
                    return Ok(None);
                }
                self.emitted += 1;
                Ok(self.held.as_ref().map(|(_, frame)| frame.clone()))
            }
            Some((_, frame)) => {
                let frame = frame.clone();
                self.emitted += 1;
                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// An opened video file, decoded with FFmpeg.
///
/// Holds the demuxer and decoder exclusively. Both are released when the
/// value is dropped, on success and failure alike.
pub struct VideoFile {
    input_context: Input,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    video_stream_index: usize,
    time_base: ffmpeg_next::Rational,
    metadata: VideoMetadata,
    resampler: Resampler,
    decoded_frame: VideoFrame,
    rgb_frame: VideoFrame,
    eof_sent: bool,
    drained: bool,
    path: PathBuf,
}

impl Debug for VideoFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoFile")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("video_stream_index", &self.video_stream_index)
            .field("frames_emitted", &self.resampler.emitted())
            .finish_non_exhaustive()
    }
}

impl VideoFile {
    /// Open `path` and prepare to emit frames at `frame_rate`.
    ///
    /// Initializes FFmpeg (idempotent), opens the container, selects the best
    /// video stream and captures its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::ResourceOpen`] if the file cannot be opened
    /// or its decoder cannot be created, and
    /// [`ConversionError::NoVideoStream`] if it has no video.
    pub fn open<P: AsRef<Path>>(path: P, frame_rate: u32) -> Result<Self, ConversionError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |reason: String| ConversionError::ResourceOpen {
            path: path.clone(),
            reason,
        };

        log::debug!("Opening video file: {}", path.display());

        ffmpeg_next::init().map_err(|e| open_error(format!("FFmpeg initialisation failed: {e}")))?;

        let input_context =
            ffmpeg_next::format::input(&path).map_err(|e| open_error(e.to_string()))?;

        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or_else(|| ConversionError::NoVideoStream(path.clone()))?;
        let video_stream_index = stream.index();
        let time_base = stream.time_base();

        let decoder_context = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| open_error(format!("Failed to read video codec parameters: {e}")))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|e| open_error(format!("Failed to create video decoder: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(open_error(format!("invalid frame size {width}x{height}")));
        }

        let mut frames_per_second = rational_to_fps(stream.avg_frame_rate());
        if frames_per_second == 0.0 {
            frames_per_second = rational_to_fps(stream.rate());
        }

        let duration_microseconds = input_context.duration();
        let duration = if duration_microseconds > 0 {
            Duration::from_micros(duration_microseconds as u64)
        } else if stream.duration() > 0 {
            Duration::from_secs_f64(pts_to_seconds(stream.duration(), time_base))
        } else {
            log::warn!(
                "{} does not report a duration; progress will be indeterminate",
                path.display()
            );
            Duration::ZERO
        };

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| open_error(format!("Failed to create pixel format converter: {e}")))?;

        let metadata = VideoMetadata {
            width,
            height,
            duration,
            frames_per_second,
            codec,
        };
        log::debug!(
            "Opened {}: {}x{}, {:.3} fps, {:?}, codec {}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.frames_per_second,
            metadata.duration,
            metadata.codec,
        );

        Ok(Self {
            input_context,
            decoder,
            scaler,
            video_stream_index,
            time_base,
            resampler: Resampler::new(frame_rate, duration),
            metadata,
            decoded_frame: VideoFrame::empty(),
            rgb_frame: VideoFrame::empty(),
            eof_sent: false,
            drained: false,
            path,
        })
    }

    /// Decode the next native frame with its presentation time in seconds.
    fn decode_next(&mut self) -> Result<Option<(f64, RgbImage)>, ConversionError> {
        if self.drained {
            return Ok(None);
        }

        loop {
            // Take what the decoder has already produced before feeding it.
            let received = pull_outcome(self.decoder.receive_frame(&mut self.decoded_frame))
                .map_err(|e| ConversionError::Decode(format!("Failed to decode frame: {e}")))?;
            match received {
                Pull::Ready => {
                    let pts = self
                        .decoded_frame
                        .timestamp()
                        .or_else(|| self.decoded_frame.pts())
                        .unwrap_or(0);
                    let seconds = pts_to_seconds(pts, self.time_base);
                    let image = self.convert_current_frame()?;
                    return Ok(Some((seconds, image)));
                }
                Pull::Finished => {
                    self.drained = true;
                    return Ok(None);
                }
                Pull::Pending if self.eof_sent => {
                    self.drained = true;
                    return Ok(None);
                }
                Pull::Pending => {}
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input_context) {
                Ok(()) => {
                    if packet.stream() == self.video_stream_index {
                        self.decoder.send_packet(&packet).map_err(|e| {
                            ConversionError::Decode(format!("Failed to send packet: {e}"))
                        })?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.decoder.send_eof().map_err(|e| {
                        ConversionError::Decode(format!("Failed to flush decoder: {e}"))
                    })?;
                    self.eof_sent = true;
                }
                Err(e) => {
                    return Err(ConversionError::Decode(format!(
                        "Failed to read packet from {}: {e}",
                        self.path.display()
                    )));
                }
            }
        }
    }

    fn convert_current_frame(&mut self) -> Result<RgbImage, ConversionError> {
        self.scaler
            .run(&self.decoded_frame, &mut self.rgb_frame)
            .map_err(|e| ConversionError::Decode(format!("Failed to convert frame: {e}")))?;

        let width = self.metadata.width;
        let height = self.metadata.height;
        let buffer = frame_to_rgb_buffer(&self.rgb_frame, width, height);
        RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            ConversionError::Decode(
                "Failed to construct RGB image from decoded frame data".to_string(),
            )
        })
    }
}

impl FrameSource for VideoFile {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, ConversionError> {
        // Split the borrow: the resampler pulls decoded frames from `self`.
        let mut resampler = std::mem::replace(
            &mut self.resampler,
            Resampler::new(1, Duration::ZERO),
        );
        let result = resampler.next(|| self.decode_next());
        self.resampler = resampler;
        result
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        log::debug!(
            "Closing {} after {} output frames",
            self.path.display(),
            self.resampler.emitted()
        );
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    /// Frames tagged by their red channel so tests can see which input frame
    /// was picked.
    fn feed(timestamps: &[f64]) -> impl FnMut() -> Result<Option<(f64, RgbImage)>, ConversionError> {
        let mut frames: Vec<(f64, RgbImage)> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, RgbImage::from_pixel(2, 2, Rgb([i as u8, 0, 0]))))
            .collect();
        frames.reverse();
        move || Ok(frames.pop())
    }

    fn collect(resampler: &mut Resampler, timestamps: &[f64]) -> Vec<u8> {
        let mut pull = feed(timestamps);
        let mut picked = Vec::new();
        while let Some(frame) = resampler.next(&mut pull).unwrap() {
            picked.push(frame.get_pixel(0, 0)[0]);
        }
        picked
    }

    fn native(count: usize, fps: f64) -> Vec<f64> {
        (0..count).map(|i| i as f64 / fps).collect()
    }

    #[test]
    fn downsampling_drops_frames() {
        // 1 second at 24 fps down to 12 fps: every other frame.
        let mut resampler = Resampler::new(12, Duration::from_secs(1));
        let picked = collect(&mut resampler, &native(24, 24.0));
        assert_eq!(picked, (0..24).step_by(2).map(|i| i as u8).collect::<Vec<_>>());
    }

    #[test]
    fn upsampling_repeats_frames() {
        let mut resampler = Resampler::new(20, Duration::from_secs(1));
        let picked = collect(&mut resampler, &native(10, 10.0));
        assert_eq!(picked.len(), 20);
        assert_eq!(&picked[..4], &[0, 0, 1, 1]);
    }

    #[test]
    fn emitted_count_tracks_duration_times_rate() {
        let mut resampler = Resampler::new(12, Duration::from_secs(10));
        let picked = collect(&mut resampler, &native(300, 30.0));
        assert_eq!(picked.len(), 120);
        assert_eq!(resampler.emitted(), 120);
    }

    #[test]
    fn timestamps_are_relative_to_first_frame() {
        let offset: Vec<f64> = native(10, 10.0).iter().map(|t| t + 5.0).collect();
        let mut resampler = Resampler::new(10, Duration::from_secs(1));
        let picked = collect(&mut resampler, &offset);
        assert_eq!(picked, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn last_frame_is_held_until_duration_ends() {
        // Container says 2 s but the stream stops after 1 s.
        let mut resampler = Resampler::new(5, Duration::from_secs(2));
        let picked = collect(&mut resampler, &native(5, 5.0));
        assert_eq!(picked.len(), 10);
        assert!(picked[5..].iter().all(|&p| p == 4));
    }

    #[test]
    fn unknown_duration_stops_after_last_frame() {
        let mut resampler = Resampler::new(10, Duration::ZERO);
        let picked = collect(&mut resampler, &native(10, 10.0));
        assert_eq!(picked.len(), 10);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let mut resampler = Resampler::new(10, Duration::from_secs(1));
        assert!(collect(&mut resampler, &[]).is_empty());
        // Exhausted sources stay exhausted.
        assert!(resampler.next(|| Ok(None)).unwrap().is_none());
    }

    #[test]
    fn decode_errors_propagate() {
        let mut resampler = Resampler::new(10, Duration::from_secs(1));
        let error = resampler
            .next(|| Err(ConversionError::Decode("corrupt".to_string())))
            .unwrap_err();
        assert!(matches!(error, ConversionError::Decode(_)));
    }

    #[test]
    fn open_missing_file_is_resource_open_error() {
        let error = VideoFile::open("definitely_not_here.mp4", 12).unwrap_err();
        assert!(matches!(error, ConversionError::ResourceOpen { .. }));
    }
}
