//! Conversion requests.
//!
//! [`ConversionRequest`] is the immutable parameter bundle for one
//! conversion. It is built through [`ConversionRequestBuilder`], which
//! validates every field before any file is opened, and it resolves the final
//! output path.
//!
//! # Example
//!
//! ```no_run
//! use vidgif::ConversionRequest;
//!
//! let request = ConversionRequest::builder("clip.mp4", "/tmp")
//!     .frame_rate(15)
//!     .target_height(240)
//!     .build()?;
//! assert!(request.output_path().ends_with("clip.gif"));
//! # Ok::<(), vidgif::ConversionError>(())
//! ```

use std::path::{Component, Path, PathBuf};

use crate::encoder::GifOptions;
use crate::error::ConversionError;

/// Extension of every output file, without the dot.
pub const OUTPUT_EXTENSION: &str = "gif";

/// Frame rate offered when the user has not typed one.
pub const DEFAULT_FRAME_RATE: u32 = 12;

/// Parse a frame-rate form field: a required positive integer.
///
/// # Errors
///
/// Returns [`ConversionError::InvalidParameter`] for empty, non-numeric,
/// zero, or negative input.
pub fn parse_frame_rate(input: &str) -> Result<u32, ConversionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConversionError::InvalidParameter(
            "frame rate is required".to_string(),
        ));
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value > 0 && value <= u32::MAX as i64 => Ok(value as u32),
        Ok(value) => Err(ConversionError::InvalidParameter(format!(
            "frame rate must be a positive integer, got {value}"
        ))),
        Err(_) => Err(ConversionError::InvalidParameter(format!(
            "frame rate must be a positive integer, got {trimmed:?}"
        ))),
    }
}

/// Parse an optional target-height form field. Empty input means "keep the
/// native resolution".
///
/// # Errors
///
/// Returns [`ConversionError::InvalidParameter`] for non-numeric, zero, or
/// negative input.
pub fn parse_target_height(input: &str) -> Result<Option<u32>, ConversionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value > 0 && value <= u32::MAX as i64 => Ok(Some(value as u32)),
        _ => Err(ConversionError::InvalidParameter(format!(
            "target height must be a positive integer, got {trimmed:?}"
        ))),
    }
}

/// Resolve `<output_dir>/<name>.gif`.
///
/// An empty (or whitespace-only) `output_name` is replaced by the stem of
/// `source`. The extension is appended unless the name already ends with
/// `.gif` in any letter case. A given name must be a plain file name: it may
/// not be absolute, contain a separator, or refer to `.` or `..`.
///
/// # Errors
///
/// Returns [`ConversionError::InvalidParameter`] if no name can be derived
/// or the given name would leave `output_dir`.
pub fn resolve_output_path(
    source: &Path,
    output_dir: &Path,
    output_name: &str,
) -> Result<PathBuf, ConversionError> {
    let trimmed = output_name.trim();
    let mut name = if trimmed.is_empty() {
        source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                ConversionError::InvalidParameter(format!(
                    "cannot derive an output name from {}",
                    source.display()
                ))
            })?
            .to_string()
    } else {
        let mut components = Path::new(trimmed).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !trimmed.contains(std::path::is_separator) => {
                trimmed.to_string()
            }
            _ => {
                return Err(ConversionError::InvalidParameter(format!(
                    "output name must be a plain file name, got {trimmed:?}"
                )));
            }
        }
    };

    let suffix = format!(".{OUTPUT_EXTENSION}");
    if !name.to_ascii_lowercase().ends_with(&suffix) {
        name.push_str(&suffix);
    }
    Ok(output_dir.join(name))
}

/// Immutable parameters for a single conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    source: PathBuf,
    output_path: PathBuf,
    frame_rate: u32,
    target_height: Option<u32>,
    gif: GifOptions,
}

impl ConversionRequest {
    /// Start building a request for `source`, writing into `output_dir`.
    pub fn builder<S: AsRef<Path>, D: AsRef<Path>>(
        source: S,
        output_dir: D,
    ) -> ConversionRequestBuilder {
        ConversionRequestBuilder {
            source: source.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            output_name: String::new(),
            frame_rate: None,
            target_height: None,
            gif: GifOptions::default(),
        }
    }

    /// The source video.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The resolved output file path (always ends in `.gif`).
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Output frames per second.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Output height, or `None` for native resolution.
    pub fn target_height(&self) -> Option<u32> {
        self.target_height
    }

    /// GIF encoding options.
    pub fn gif_options(&self) -> &GifOptions {
        &self.gif
    }
}

/// Builder for [`ConversionRequest`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ConversionRequestBuilder {
    source: PathBuf,
    output_dir: PathBuf,
    output_name: String,
    frame_rate: Option<i64>,
    target_height: Option<i64>,
    gif: GifOptions,
}

impl ConversionRequestBuilder {
    /// Set the output base name. Empty means "derive from the source".
    pub fn output_name<N: Into<String>>(mut self, name: N) -> Self {
        self.output_name = name.into();
        self
    }

    /// Set the output frame rate. Required.
    pub fn frame_rate(mut self, frame_rate: i64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the output height. Width follows the source aspect ratio.
    pub fn target_height(mut self, height: i64) -> Self {
        self.target_height = Some(height);
        self
    }

    /// Set the output height from an optional value.
    pub fn maybe_target_height(mut self, height: Option<u32>) -> Self {
        self.target_height = height.map(i64::from);
        self
    }

    /// Replace the GIF encoding options.
    pub fn gif_options(mut self, options: GifOptions) -> Self {
        self.gif = options;
        self
    }

    /// Validate and build the request.
    ///
    /// The source file is not opened here. Whether it exists is checked when
    /// the conversion starts, so a missing source surfaces as a
    /// [`ConversionError::ResourceOpen`] from the conversion itself.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::InvalidParameter`] when the frame rate is
    /// missing or not positive, the target height is not positive, the
    /// source path is empty, the output directory does not exist, or the
    /// GIF options are out of range.
    pub fn build(self) -> Result<ConversionRequest, ConversionError> {
        let frame_rate = match self.frame_rate {
            None => {
                return Err(ConversionError::InvalidParameter(
                    "frame rate is required".to_string(),
                ));
            }
            Some(rate) if rate <= 0 || rate > u32::MAX as i64 => {
                return Err(ConversionError::InvalidParameter(format!(
                    "frame rate must be a positive integer, got {rate}"
                )));
            }
            Some(rate) => rate as u32,
        };

        let target_height = match self.target_height {
            None => None,
            Some(height) if height <= 0 || height > u32::MAX as i64 => {
                return Err(ConversionError::InvalidParameter(format!(
                    "target height must be a positive integer, got {height}"
                )));
            }
            Some(height) => Some(height as u32),
        };

        if self.source.as_os_str().is_empty() {
            return Err(ConversionError::InvalidParameter(
                "source path is empty".to_string(),
            ));
        }

        if !self.output_dir.is_dir() {
            return Err(ConversionError::InvalidParameter(format!(
                "output directory {} does not exist",
                self.output_dir.display()
            )));
        }

        self.gif.validate()?;

        let output_path = resolve_output_path(&self.source, &self.output_dir, &self.output_name)?;

        Ok(ConversionRequest {
            source: self.source,
            output_path,
            frame_rate,
            target_height,
            gif: self.gif,
        })
    }
}
