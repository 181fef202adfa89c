//! Streaming animated-GIF encoder.
//!
//! [`GifEncoder`] accepts RGB frames one at a time and produces a single GIF
//! with one global palette. Encoding takes two passes over the stream:
//!
//! 1. **Collect**: every frame written is fed to FFmpeg's `palettegen` and
//!    spooled, uncompressed, to an anonymous temporary file.
//! 2. **Emit**: [`finish`](GifEncoder::finish) collects the palette, replays
//!    the spool through `paletteuse` (Sierra-2-4A dithering by default) and
//!    writes each mapped frame to the GIF.
//!
//! The GIF is written to a `.part` staging file next to the destination and
//! renamed into place only after the trailer is flushed. Dropping an
//! unfinished encoder, or any failure during `finish`, removes the staging
//! file, so a failed conversion never leaves a GIF at the destination.
//!
//! # Example
//!
//! ```no_run
//! use image::RgbImage;
//! use vidgif::{GifEncoder, GifOptions};
//!
//! let mut encoder = GifEncoder::create("out.gif", 64, 48, 12, GifOptions::new())?;
//! for shade in 0..24u8 {
//!     encoder.write_frame(&RgbImage::from_pixel(64, 48, image::Rgb([shade * 10, 0, 0])))?;
//! }
//! let path = encoder.finish()?;
//! # Ok::<(), vidgif::ConversionError>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use gif::{Encoder, Frame, Repeat};
use image::RgbImage;
use image::imageops::FilterType;

use crate::error::ConversionError;
use crate::palette::{
    Dither, MAX_PALETTE_COLORS, MIN_PALETTE_COLORS, PaletteGenerator, PaletteMapper,
};
use crate::utilities::{gif_frame_delay, rgb_buffer_to_frame};

/// Configuration for animated GIF output.
///
/// Controls looping, palette size, dithering, and the resampling filter used
/// when frames are resized.
#[derive(Debug, Clone)]
pub struct GifOptions {
    /// How many times the GIF should repeat. `None` means loop forever.
    pub repeat: Option<u16>,
    /// Maximum palette size (4 – 256, default 256).
    pub max_colors: u16,
    /// Error diffusion used when mapping frames onto the palette.
    pub dither: Dither,
    /// Resampling filter for resized frames.
    pub resize_filter: FilterType,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            repeat: None,
            max_colors: MAX_PALETTE_COLORS as u16,
            dither: Dither::SierraLite,
            resize_filter: FilterType::Triangle,
        }
    }
}

impl GifOptions {
    /// Create a new [`GifOptions`] with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repeat count. `None` means loop forever.
    pub fn repeat(mut self, repeat: Option<u16>) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the maximum palette size.
    pub fn max_colors(mut self, colors: u16) -> Self {
        self.max_colors = colors;
        self
    }

    /// Set the dithering algorithm.
    pub fn dither(mut self, dither: Dither) -> Self {
        self.dither = dither;
        self
    }

    /// Set the resampling filter used by the resizer.
    pub fn resize_filter(mut self, filter: FilterType) -> Self {
        self.resize_filter = filter;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConversionError> {
        if !(MIN_PALETTE_COLORS as u16..=MAX_PALETTE_COLORS as u16).contains(&self.max_colors) {
            return Err(ConversionError::InvalidParameter(format!(
                "palette size must be between {MIN_PALETTE_COLORS} and {MAX_PALETTE_COLORS}, got {}",
                self.max_colors
            )));
        }
        Ok(())
    }
}

/// Path of the staging file written before the final rename.
pub(crate) fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// A scoped, two-pass GIF writer. See the [module documentation](self).
#[derive(Debug)]
pub struct GifEncoder {
    destination: PathBuf,
    staging: PathBuf,
    output: Option<File>,
    spool: BufWriter<File>,
    palette: PaletteGenerator,
    width: u32,
    height: u32,
    frame_rate: u32,
    frames: u64,
    options: GifOptions,
}

impl GifEncoder {
    /// Open an encoder writing `width` × `height` frames at `frame_rate`.
    ///
    /// The staging file next to `destination` is created immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::InvalidParameter`] for zero or oversized
    /// dimensions or an invalid frame rate, [`ConversionError::Encode`] if the
    /// output file, the spool or the palette filter cannot be created.
    pub fn create<P: AsRef<Path>>(
        destination: P,
        width: u32,
        height: u32,
        frame_rate: u32,
        options: GifOptions,
    ) -> Result<Self, ConversionError> {
        let destination = destination.as_ref().to_path_buf();
        if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(ConversionError::InvalidParameter(format!(
                "GIF dimensions must be between 1 and {}, got {width}x{height}",
                u16::MAX
            )));
        }
        if frame_rate == 0 {
            return Err(ConversionError::InvalidParameter(
                "frame rate must be greater than zero".to_string(),
            ));
        }
        options.validate()?;

        let palette = PaletteGenerator::new(width, height, frame_rate, options.max_colors)?;

        let staging = staging_path(&destination);
        log::debug!(
            "Opening GIF encoder for {} ({width}x{height} @ {frame_rate} fps, staging {})",
            destination.display(),
            staging.display(),
        );

        let output = File::create(&staging).map_err(|e| {
            ConversionError::Encode(format!(
                "Failed to create output file {}: {e}",
                staging.display()
            ))
        })?;

        let spool = match tempfile::tempfile() {
            Ok(file) => file,
            Err(e) => {
                drop(output);
                let _ = fs::remove_file(&staging);
                return Err(ConversionError::Encode(format!(
                    "Failed to create frame spool: {e}"
                )));
            }
        };

        Ok(Self {
            destination,
            staging,
            output: Some(output),
            spool: BufWriter::new(spool),
            palette,
            width,
            height,
            frame_rate,
            frames: 0,
            options,
        })
    }

    /// Accept the next frame in temporal order.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Encode`] if the frame size differs from the
    /// encoder's or the palette filter fails, [`ConversionError::Write`] if
    /// spooling fails.
    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<(), ConversionError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(ConversionError::Encode(format!(
                "frame {} is {}x{}, expected {}x{}",
                self.frames,
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let pixels = frame.as_raw();
        self.palette.push(&rgb_buffer_to_frame(
            pixels,
            self.width,
            self.height,
            self.frames as i64,
        ))?;
        self.spool
            .write_all(pixels)
            .map_err(|e| ConversionError::write("Failed to spool frame", e))?;
        self.frames += 1;
        log::trace!("Spooled frame {}", self.frames);
        Ok(())
    }

    /// Collect the palette, write every frame and the trailer, and move the GIF
    /// to its destination.
    ///
    /// Consumes the encoder. On error the staging file is removed.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::Encode`] when no frames were written, the
    /// palette filters fail or the GIF encoder rejects its input, and
    /// [`ConversionError::Write`] on I/O failure.
    pub fn finish(mut self) -> Result<PathBuf, ConversionError> {
        // `self` is dropped on every error path below, which removes the
        // staging file.
        let output = self
            .output
            .take()
            .ok_or_else(|| ConversionError::Encode("encoder already finished".to_string()))?;

        if self.frames == 0 {
            return Err(ConversionError::Encode(
                "no frames were written".to_string(),
            ));
        }

        let palette = self.palette.finish()?;
        log::debug!(
            "Generated palette of up to {} colours over {} frames",
            self.options.max_colors,
            self.frames,
        );

        let table = palette.gif_table().to_vec();
        let mut mapper = PaletteMapper::new(
            self.width,
            self.height,
            self.frame_rate,
            palette,
            self.options.dither,
        )?;

        self.spool
            .flush()
            .map_err(|e| ConversionError::write("Failed to flush frame spool", e))?;
        let spool = self.spool.get_mut();
        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| ConversionError::write("Failed to rewind frame spool", e))?;
        let mut reader = BufReader::new(&*spool);

        let width = self.width as u16;
        let height = self.height as u16;
        let mut encoder = Encoder::new(BufWriter::new(output), width, height, &table)
            .map_err(|e| ConversionError::from_gif("Failed to create GIF encoder", e))?;

        let repeat = match self.options.repeat {
            None => Repeat::Infinite,
            Some(n) => Repeat::Finite(n),
        };
        encoder
            .set_repeat(repeat)
            .map_err(|e| ConversionError::from_gif("Failed to set GIF repeat", e))?;

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut pixels = vec![0u8; frame_len];
        let frame_rate = self.frame_rate;
        let mut written = 0u64;
        let mut emit = |indices: Vec<u8>| -> Result<(), ConversionError> {
            let frame = Frame {
                width,
                height,
                delay: gif_frame_delay(written, frame_rate),
                buffer: indices.into(),
                ..Frame::default()
            };
            encoder
                .write_frame(&frame)
                .map_err(|e| ConversionError::from_gif("Failed to write GIF frame", e))?;
            written += 1;
            Ok(())
        };

        for index in 0..self.frames {
            reader
                .read_exact(&mut pixels)
                .map_err(|e| ConversionError::write("Failed to read spooled frame", e))?;
            mapper.push(&rgb_buffer_to_frame(
                &pixels,
                self.width,
                self.height,
                index as i64,
            ))?;
            while let Some(indices) = mapper.pull()? {
                emit(indices)?;
            }
        }
        mapper.flush()?;
        while let Some(indices) = mapper.pull()? {
            emit(indices)?;
        }

        if written != self.frames {
            return Err(ConversionError::Encode(format!(
                "palette mapping returned {written} of {} frames",
                self.frames
            )));
        }

        let writer = encoder
            .into_inner()
            .map_err(|e| ConversionError::write("Failed to write GIF trailer", e))?;
        let file = writer
            .into_inner()
            .map_err(|e| ConversionError::write("Failed to flush GIF", e.into_error()))?;
        file.sync_all()
            .map_err(|e| ConversionError::write("Failed to sync GIF", e))?;
        drop(file);

        fs::rename(&self.staging, &self.destination).map_err(|e| {
            ConversionError::write(
                &format!("Failed to move GIF into place at {}", self.destination.display()),
                e,
            )
        })?;

        log::debug!(
            "Finalized {} ({} frames)",
            self.destination.display(),
            self.frames
        );
        Ok(self.destination.clone())
    }
}

impl Drop for GifEncoder {
    fn drop(&mut self) {
        // Still holding the output handle, or staging never renamed: the GIF
        // is incomplete.
        if self.staging.exists() {
            self.output.take();
            if let Err(e) = fs::remove_file(&self.staging) {
                log::warn!(
                    "Failed to remove incomplete GIF {}: {e}",
                    self.staging.display()
                );
            } else {
                log::debug!("Removed incomplete GIF {}", self.staging.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use image::Rgb;

    use super::*;

    fn decode(path: &Path) -> Vec<(u16, u16, u16)> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(File::open(path).unwrap()).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push((frame.width, frame.height, frame.delay));
        }
        frames
    }

    #[test]
    fn writes_all_frames_and_removes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.gif");
        let mut encoder = GifEncoder::create(&destination, 16, 8, 10, GifOptions::new()).unwrap();
        assert!(staging_path(&destination).exists());

        for i in 0..5u8 {
            encoder
                .write_frame(&RgbImage::from_pixel(16, 8, Rgb([i * 50, 255 - i * 50, 0])))
                .unwrap();
        }
        let path = encoder.finish().unwrap();

        assert_eq!(path, destination);
        assert!(!staging_path(&destination).exists());
        let frames = decode(&destination);
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|&(w, h, delay)| w == 16 && h == 8 && delay == 10));
    }

    #[test]
    fn flat_frames_keep_their_colours_without_dithering() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("flat.gif");
        let colours = [[200u8, 30, 30], [30, 200, 30], [30, 30, 200]];
        let options = GifOptions::new().dither(Dither::None).max_colors(16);
        let mut encoder = GifEncoder::create(&destination, 6, 6, 12, options).unwrap();
        for colour in colours {
            encoder.write_frame(&RgbImage::from_pixel(6, 6, Rgb(colour))).unwrap();
        }
        encoder.finish().unwrap();

        let mut decoder = gif::DecodeOptions::new()
            .read_info(File::open(&destination).unwrap())
            .unwrap();
        for colour in colours {
            let frame = decoder.read_next_frame().unwrap().unwrap();
            assert!(
                frame
                    .buffer
                    .chunks_exact(4)
                    .all(|pixel| pixel[..3] == colour),
                "frame does not match {colour:?}"
            );
        }
        assert!(decoder.read_next_frame().unwrap().is_none());
    }

    #[test]
    fn dropped_encoder_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("abandoned.gif");
        {
            let mut encoder =
                GifEncoder::create(&destination, 4, 4, 12, GifOptions::new()).unwrap();
            encoder.write_frame(&RgbImage::new(4, 4)).unwrap();
        }
        assert!(!destination.exists());
        assert!(!staging_path(&destination).exists());
    }

    #[test]
    fn mismatched_frame_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder =
            GifEncoder::create(dir.path().join("x.gif"), 4, 4, 12, GifOptions::new()).unwrap();
        let error = encoder.write_frame(&RgbImage::new(5, 4)).unwrap_err();
        assert!(matches!(error, ConversionError::Encode(_)));
    }

    #[test]
    fn finishing_without_frames_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("empty.gif");
        let encoder = GifEncoder::create(&destination, 4, 4, 12, GifOptions::new()).unwrap();
        assert!(encoder.finish().is_err());
        assert!(!destination.exists());
        assert!(!staging_path(&destination).exists());
    }

    #[test]
    fn unwritable_destination_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("missing").join("out.gif");
        let error = GifEncoder::create(&destination, 4, 4, 12, GifOptions::new()).unwrap_err();
        assert!(matches!(error, ConversionError::Encode(_)));
    }

    #[test]
    fn option_validation() {
        assert!(GifOptions::new().max_colors(1).validate().is_err());
        assert!(GifOptions::new().max_colors(3).validate().is_err());
        assert!(GifOptions::new().max_colors(4).validate().is_ok());
        assert!(GifOptions::new().max_colors(300).validate().is_err());
        assert!(GifOptions::new().max_colors(16).validate().is_ok());
    }

    #[test]
    fn staging_name_appends_part() {
        assert_eq!(
            staging_path(Path::new("/tmp/a.gif")),
            Path::new("/tmp/a.gif.part")
        );
    }
}
