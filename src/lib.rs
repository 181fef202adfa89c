//! # vidgif
//!
//! Convert video files to animated GIFs, one frame at a time, with
//! pollable progress.
//!
//! `vidgif` decodes a video through FFmpeg (via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate), resamples it
//! to a fixed frame rate, optionally downscales it, and streams every frame
//! into a GIF encoder. Frames are never collected in memory: the conversion
//! runs in bounded memory regardless of the input's length.
//!
//! ## Quick Start
//!
//! ### Convert on a Background Thread
//!
//! ```no_run
//! use std::{thread, time::Duration};
//!
//! use vidgif::{ConversionRequest, spawn_conversion};
//!
//! let request = ConversionRequest::builder("input.mp4", "out")
//!     .frame_rate(12)
//!     .target_height(240)
//!     .build()
//!     .unwrap();
//!
//! let handle = spawn_conversion(request).unwrap();
//! while !handle.is_finished() {
//!     if let Some(percent) = handle.poll_progress() {
//!         println!("{percent:.2}%");
//!     }
//!     thread::sleep(Duration::from_millis(100));
//! }
//! println!("saved {}", handle.join().unwrap().display());
//! ```
//!
//! ### Convert on the Current Thread
//!
//! ```no_run
//! use vidgif::{ConversionRequest, ConversionStatus, convert, progress_channel};
//!
//! let request = ConversionRequest::builder("input.mp4", "out").frame_rate(12).build().unwrap();
//! let (sender, _receiver) = progress_channel();
//! let status = ConversionStatus::new();
//!
//! let gif = convert(&request, &sender, &status).unwrap();
//! ```
//!
//! ## Features
//!
//! - **Streaming conversion**: decode, resize and encode one frame at a time
//! - **Fixed output frame rate**: frames are resampled by presentation time
//! - **Aspect-preserving resize**: give a height, the width follows
//! - **Shared-palette GIFs**: one FFmpeg `palettegen` palette for the whole
//!   clip, mapped with `paletteuse` and Sierra Lite dithering by default
//! - **Latest-wins progress**: a single-slot channel a UI can poll
//! - **Observable lifecycle**: `Idle → Opening → Streaming → Finalizing →
//!   Done`, or `Failed`
//! - **Safe output**: incomplete GIFs never appear at the destination path
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `convert_async` and `ConversionFuture` via Tokio |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod convert;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod metadata;
pub mod palette;
pub mod progress;
pub mod request;
pub mod resize;
pub mod source;
#[cfg(feature = "async")]
pub mod task;
mod utilities;
pub mod worker;

pub use convert::{
    ConversionOutcome, ConversionState, ConversionStatus, convert, convert_with,
};
pub use encoder::{GifEncoder, GifOptions};
pub use error::{ConversionError, ErrorKind};
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use metadata::VideoMetadata;
pub use palette::{Dither, MAX_PALETTE_COLORS, MIN_PALETTE_COLORS};
pub use progress::{
    ProgressCallback, ProgressInfo, ProgressReceiver, ProgressSender, progress_channel,
};
pub use request::{
    ConversionRequest, ConversionRequestBuilder, DEFAULT_FRAME_RATE, OUTPUT_EXTENSION,
    parse_frame_rate, parse_target_height, resolve_output_path,
};
pub use resize::{Resizer, scaled_dimensions};
pub use source::{FrameSource, VideoFile};
#[cfg(feature = "async")]
pub use task::{ConversionFuture, convert_async};
pub use utilities::expected_frame_count;
pub use worker::{ConversionHandle, spawn_conversion};
