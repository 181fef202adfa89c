//! Conversion orchestration.
//!
//! [`convert`] runs one conversion to completion on the calling thread:
//! it opens the source, streams every frame through the [`Resizer`] into a
//! [`GifEncoder`], reports progress after each frame, and finalizes the GIF.
//! [`ConversionStatus`] exposes which stage the run is in so another thread
//! can tell "still running" from "done" and "failed".
//!
//! The stages are:
//!
//! ```text
//! Idle -> Opening -> Streaming -> Finalizing -> Done
//!   \________\___________\____________\-----> Failed
//! ```
//!
//! Use [`spawn_conversion`](crate::spawn_conversion) to run a conversion on a
//! background thread instead.
//!
//! # Example
//!
//! ```no_run
//! use vidgif::{ConversionRequest, ConversionStatus, convert, progress_channel};
//!
//! let request = ConversionRequest::builder("input.mp4", "out").frame_rate(12).build()?;
//! let (sender, receiver) = progress_channel();
//! let status = ConversionStatus::new();
//! let gif = convert(&request, &sender, &status)?;
//! assert_eq!(receiver.poll(), Some(100.0));
//! # Ok::<(), vidgif::ConversionError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::encoder::GifEncoder;
use crate::error::ConversionError;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::request::ConversionRequest;
use crate::resize::Resizer;
use crate::source::{FrameSource, VideoFile};

/// Terminal result of a conversion: the finished GIF, or why it failed.
pub type ConversionOutcome = Result<PathBuf, ConversionError>;

/// Stage of a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversionState {
    /// Not started.
    #[default]
    Idle,
    /// Opening the source video.
    Opening,
    /// Decoding, resizing, and spooling frames.
    Streaming,
    /// Writing the GIF and releasing resources.
    Finalizing,
    /// The GIF is complete at its output path.
    Done,
    /// The run aborted. No output file was produced.
    Failed,
}

impl ConversionState {
    /// Whether the run has ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversionState::Done | ConversionState::Failed)
    }
}

impl Display for ConversionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ConversionState::Idle => "idle",
            ConversionState::Opening => "opening",
            ConversionState::Streaming => "streaming",
            ConversionState::Finalizing => "finalizing",
            ConversionState::Done => "done",
            ConversionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    state: ConversionState,
    history: Vec<ConversionState>,
}

/// Shared, thread-safe view of a run's [`ConversionState`].
///
/// Clones observe the same run.
#[derive(Debug, Clone, Default)]
pub struct ConversionStatus {
    inner: Arc<Mutex<StatusInner>>,
}

impl ConversionStatus {
    /// A status in [`ConversionState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current stage.
    pub fn state(&self) -> ConversionState {
        self.lock().state
    }

    /// Every stage entered so far, in order, excluding the initial `Idle`.
    pub fn history(&self) -> Vec<ConversionState> {
        self.lock().history.clone()
    }

    pub(crate) fn transition(&self, next: ConversionState) {
        let mut inner = self.lock();
        log::debug!("Conversion {} -> {}", inner.state, next);
        inner.state = next;
        inner.history.push(next);
    }
}

/// Convert `request` using FFmpeg to decode the source.
///
/// Blocks until the GIF is written or the run fails. `progress` receives a
/// sample after every frame and a final 100.0 before the run reaches
/// [`ConversionState::Done`].
///
/// # Errors
///
/// Returns [`ConversionError::ResourceOpen`] (or
/// [`ConversionError::NoVideoStream`]) if the source cannot be opened,
/// [`ConversionError::Decode`], [`ConversionError::Encode`] or
/// [`ConversionError::Write`] if the stream fails midway. `status` ends in
/// [`ConversionState::Failed`] in every error case.
pub fn convert(
    request: &ConversionRequest,
    progress: &dyn ProgressCallback,
    status: &ConversionStatus,
) -> ConversionOutcome {
    convert_with(request, progress, status, |path, frame_rate| {
        VideoFile::open(path, frame_rate)
    })
}

/// Convert `request`, obtaining frames from `open` instead of FFmpeg.
///
/// `open` receives the source path and output frame rate. See [`convert`].
pub fn convert_with<S, F>(
    request: &ConversionRequest,
    progress: &dyn ProgressCallback,
    status: &ConversionStatus,
    open: F,
) -> ConversionOutcome
where
    S: FrameSource,
    F: FnOnce(&Path, u32) -> Result<S, ConversionError>,
{
    let result = run(request, progress, status, open);
    match &result {
        Ok(path) => {
            status.transition(ConversionState::Done);
            log::info!("Wrote {}", path.display());
        }
        Err(error) => {
            status.transition(ConversionState::Failed);
            log::error!(
                "Conversion of {} failed: {error}",
                request.source().display()
            );
        }
    }
    result
}

fn run<S, F>(
    request: &ConversionRequest,
    progress: &dyn ProgressCallback,
    status: &ConversionStatus,
    open: F,
) -> ConversionOutcome
where
    S: FrameSource,
    F: FnOnce(&Path, u32) -> Result<S, ConversionError>,
{
    let source_path = request.source();
    if !source_path.is_file() {
        return Err(ConversionError::ResourceOpen {
            path: source_path.to_path_buf(),
            reason: "no such file".to_string(),
        });
    }

    let resizer = Resizer::new(request.target_height(), request.gif_options().resize_filter)?;

    status.transition(ConversionState::Opening);
    let mut source = open(source_path, request.frame_rate())?;
    let metadata = source.metadata().clone();
    let (width, height) = resizer.output_dimensions(metadata.width, metadata.height)?;
    let expected = metadata.expected_frames(request.frame_rate());
    log::debug!(
        "Converting {} -> {} ({}x{} -> {width}x{height}, {} fps, ~{expected} frames)",
        source_path.display(),
        request.output_path().display(),
        metadata.width,
        metadata.height,
        request.frame_rate(),
    );

    let mut encoder = GifEncoder::create(
        request.output_path(),
        width,
        height,
        request.frame_rate(),
        request.gif_options().clone(),
    )?;

    status.transition(ConversionState::Streaming);
    let mut tracker = ProgressTracker::new(progress, expected);
    while let Some(frame) = source.next_frame()? {
        let frame = resizer.apply(&frame)?;
        encoder.write_frame(&frame)?;
        tracker.advance();
    }

    status.transition(ConversionState::Finalizing);
    drop(source);
    let path = encoder.finish()?;
    let last = tracker.finish();
    log::debug!(
        "Streamed {} frames (estimated {expected}) in {:.2?}",
        last.current,
        last.elapsed
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::VideoMetadata;
    use crate::progress::ProgressInfo;

    struct SyntheticSource {
        metadata: VideoMetadata,
        remaining: u64,
        fail_at: Option<u64>,
        /// Deleted when the last frame has been handed out.
        delete_at_end: Option<PathBuf>,
    }

    impl SyntheticSource {
        fn new(width: u32, height: u32, seconds: u64, frame_rate: u32) -> Self {
            Self {
                metadata: VideoMetadata {
                    width,
                    height,
                    duration: Duration::from_secs(seconds),
                    frames_per_second: frame_rate as f64,
                    codec: "synthetic".to_string(),
                },
                remaining: seconds * frame_rate as u64,
                fail_at: None,
                delete_at_end: None,
            }
        }
    }

    impl FrameSource for SyntheticSource {
        fn metadata(&self) -> &VideoMetadata {
            &self.metadata
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>, ConversionError> {
            if self.fail_at == Some(self.remaining) {
                return Err(ConversionError::Decode("corrupt packet".to_string()));
            }
            if self.remaining == 0 {
                if let Some(path) = self.delete_at_end.take() {
                    std::fs::remove_file(path).unwrap();
                }
                return Ok(None);
            }
            self.remaining -= 1;
            let shade = (self.remaining * 13 % 256) as u8;
            Ok(Some(RgbImage::from_pixel(
                self.metadata.width,
                self.metadata.height,
                Rgb([shade, 255 - shade, 128]),
            )))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<f32>>);

    impl ProgressCallback for Recording {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.lock().unwrap().push(info.percentage);
        }
    }

    fn request_in(dir: &Path, height: Option<u32>) -> ConversionRequest {
        let source = dir.join("source.mp4");
        std::fs::write(&source, b"placeholder").unwrap();
        ConversionRequest::builder(&source, dir)
            .frame_rate(12)
            .maybe_target_height(height)
            .build()
            .unwrap()
    }

    fn gif_frames(path: &Path) -> Vec<(u16, u16)> {
        let mut decoder = gif::DecodeOptions::new()
            .read_info(std::fs::File::open(path).unwrap())
            .unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push((frame.width, frame.height));
        }
        frames
    }

    #[test]
    fn successful_run_walks_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), None);
        let recording = Recording::default();
        let status = ConversionStatus::new();

        let path = convert_with(&request, &recording, &status, |_, _| {
            Ok(SyntheticSource::new(32, 18, 2, 12))
        })
        .unwrap();

        assert_eq!(path, request.output_path());
        assert_eq!(
            status.history(),
            vec![
                ConversionState::Opening,
                ConversionState::Streaming,
                ConversionState::Finalizing,
                ConversionState::Done,
            ]
        );
        let frames = gif_frames(&path);
        assert_eq!(frames.len(), 24);
        assert!(frames.iter().all(|&f| f == (32, 18)));
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), None);
        let recording = Recording::default();

        convert_with(&request, &recording, &ConversionStatus::new(), |_, _| {
            Ok(SyntheticSource::new(8, 8, 1, 12))
        })
        .unwrap();

        let values = recording.0.lock().unwrap();
        assert_eq!(values.len(), 13);
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*values.last().unwrap(), 100.0);
    }

    #[test]
    fn frames_are_resized_to_target_height() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), Some(9));
        let path = convert_with(&request, &Recording::default(), &ConversionStatus::new(), |_, _| {
            Ok(SyntheticSource::new(64, 36, 1, 12))
        })
        .unwrap();
        assert!(gif_frames(&path).iter().all(|&f| f == (16, 9)));
    }

    #[test]
    fn missing_source_fails_before_opening() {
        let dir = tempfile::tempdir().unwrap();
        let request = ConversionRequest::builder(dir.path().join("nope.mp4"), dir.path())
            .frame_rate(12)
            .build()
            .unwrap();
        let recording = Recording::default();
        let status = ConversionStatus::new();
        let mut opened = false;

        let error = convert_with(&request, &recording, &status, |_, _| {
            opened = true;
            Ok(SyntheticSource::new(8, 8, 1, 12))
        })
        .unwrap_err();

        assert!(matches!(error, ConversionError::ResourceOpen { .. }));
        assert!(!opened);
        assert_eq!(status.history(), vec![ConversionState::Failed]);
        assert!(recording.0.lock().unwrap().is_empty());
        assert!(!request.output_path().exists());
    }

    #[test]
    fn decode_failure_midway_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), None);
        let status = ConversionStatus::new();

        let error = convert_with(&request, &Recording::default(), &status, |_, _| {
            let mut source = SyntheticSource::new(8, 8, 2, 12);
            source.fail_at = Some(10);
            Ok(source)
        })
        .unwrap_err();

        assert!(matches!(error, ConversionError::Decode(_)));
        assert_eq!(status.state(), ConversionState::Failed);
        assert!(!status.history().contains(&ConversionState::Done));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().contains(".gif"))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[test]
    fn failed_move_into_place_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), None);
        let status = ConversionStatus::new();
        let recording = Recording::default();
        let staging = dir.path().join("source.gif.part");

        // Losing the staging file makes the final rename fail.
        let error = convert_with(&request, &recording, &status, |_, _| {
            let mut source = SyntheticSource::new(8, 8, 1, 12);
            source.delete_at_end = Some(staging.clone());
            Ok(source)
        })
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Write);
        assert_eq!(status.history().last(), Some(&ConversionState::Failed));
        assert!(!status.history().contains(&ConversionState::Done));
        assert!(status.history().contains(&ConversionState::Finalizing));
        assert!(!request.output_path().exists());
        assert!(!staging.exists());
        assert_eq!(recording.0.lock().unwrap().len(), 12);
    }

    #[test]
    fn open_failure_transitions_from_opening() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), None);
        let status = ConversionStatus::new();

        let result = convert_with::<SyntheticSource, _>(
            &request,
            &Recording::default(),
            &status,
            |path, _| {
                Err(ConversionError::ResourceOpen {
                    path: path.to_path_buf(),
                    reason: "unsupported container".to_string(),
                })
            },
        );

        assert!(result.is_err());
        assert_eq!(
            status.history(),
            vec![ConversionState::Opening, ConversionState::Failed]
        );
    }

    #[test]
    fn terminal_states() {
        assert!(ConversionState::Done.is_terminal());
        assert!(ConversionState::Failed.is_terminal());
        assert!(!ConversionState::Streaming.is_terminal());
        assert_eq!(ConversionState::Finalizing.to_string(), "finalizing");
    }
}
