//! Internal utility functions.
//!
//! Helpers for pixel-data copying, FFmpeg pull results, timestamp
//! conversion and GIF timing that do not belong in any single public module.

use ffmpeg_next::{
    Error as FfmpegError, Rational, format::Pixel, frame::Video as VideoFrame,
    util::error::EAGAIN,
};

/// What a decoder or buffer sink returned when asked for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pull {
    /// A frame was written to the output.
    Ready,
    /// More input is needed first.
    Pending,
    /// End of stream; nothing more will come out.
    Finished,
}

/// Classify the result of `receive_frame` or `sink().frame()`. Anything
/// other than a frame, EAGAIN or EOF is a real failure.
pub(crate) fn pull_outcome(result: Result<(), FfmpegError>) -> Result<Pull, FfmpegError> {
    match result {
        Ok(()) => Ok(Pull::Ready),
        Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(Pull::Pending),
        Err(FfmpegError::Eof) => Ok(Pull::Finished),
        Err(e) => Err(e),
    }
}

/// Copy pixel data from an FFmpeg RGB24 frame into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × 3).
/// This strips that padding so the result can be passed directly to
/// [`image::RgbImage::from_raw`].
pub(crate) fn frame_to_rgb_buffer(video_frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let expected_stride = (width as usize) * 3;
    let data = video_frame.data(0);

    if stride == expected_stride {
        data[..expected_stride * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(expected_stride * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + expected_stride]);
        }
        buffer
    }
}

/// Copy a tightly-packed RGB24 buffer into a new FFmpeg frame stamped `pts`.
pub(crate) fn rgb_buffer_to_frame(pixels: &[u8], width: u32, height: u32, pts: i64) -> VideoFrame {
    let mut frame = VideoFrame::new(Pixel::RGB24, width, height);
    let row_length = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data_mut(0);
    for (row, line) in pixels.chunks_exact(row_length).take(height as usize).enumerate() {
        let start = row * stride;
        data[start..start + row_length].copy_from_slice(line);
    }
    frame.set_pts(Some(pts));
    frame
}

/// Rescale a PTS value from stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Convert a rational frame rate to frames per second, or `0.0` if undefined.
pub(crate) fn rational_to_fps(rate: Rational) -> f64 {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    }
}

/// Number of output frames expected for `duration_seconds` at `frame_rate`.
///
/// This is the progress denominator. It is an estimate: resampling may
/// emit one frame more or less than this.
pub fn expected_frame_count(duration_seconds: f64, frame_rate: u32) -> u64 {
    if duration_seconds <= 0.0 || frame_rate == 0 {
        return 0;
    }
    (duration_seconds * frame_rate as f64).round() as u64
}

/// GIF delay (in hundredths of a second) for the frame at `index`.
///
/// Delays are derived from cumulative rounded timestamps so their sum stays
/// within one centisecond of `frames / frame_rate`.
pub(crate) fn gif_frame_delay(index: u64, frame_rate: u32) -> u16 {
    let fps = frame_rate.max(1) as u64;
    let start = (index * 100 + fps / 2) / fps;
    let end = ((index + 1) * 100 + fps / 2) / fps;
    (end - start).clamp(1, u16::MAX as u64) as u16
}
