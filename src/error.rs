//! Error types for the `vidgif` crate.
//!
//! This module defines [`ConversionError`], the unified error type returned by
//! every fallible operation in the crate, and [`ErrorKind`], a payload-free
//! classification a presentation layer can match on.

use std::{io::Error as IoError, path::PathBuf};

use gif::EncodingError;
use thiserror::Error;

/// The unified error type for all `vidgif` operations.
///
/// Every variant aborts the conversion that produced it. No partial output is
/// ever reported as a success alongside one of these.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConversionError {
    /// A request parameter was missing or out of range. Raised before any
    /// resource is opened.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The source video could not be opened or its streams read.
    #[error("Failed to open video at {path}: {reason}")]
    ResourceOpen {
        /// Path that was passed to [`VideoFile::open`](crate::VideoFile::open).
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The source opened but contains no video stream.
    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    /// A frame could not be extracted from the source.
    #[error("Failed to decode video frame: {0}")]
    Decode(String),

    /// The GIF encoder could not be started or rejected its input.
    #[error("GIF encoding error: {0}")]
    Encode(String),

    /// Writing encoded or spooled data to disk failed.
    #[error("Write error: {0}")]
    Write(String),

    /// The background conversion thread could not be started.
    #[error("Failed to start conversion worker: {0}")]
    WorkerSpawn(#[source] IoError),

    /// The background conversion thread terminated without an outcome.
    #[error("Conversion worker terminated unexpectedly")]
    WorkerPanicked,
}

/// Coarse failure classification for a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing request parameter.
    InvalidParameter,
    /// Source could not be opened.
    ResourceOpen,
    /// Frame extraction failed.
    Decode,
    /// Encoder failed.
    Encode,
    /// Disk write failed.
    Write,
    /// Worker thread could not start or died.
    Worker,
}

impl ConversionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            ConversionError::ResourceOpen { .. } | ConversionError::NoVideoStream(_) => {
                ErrorKind::ResourceOpen
            }
            ConversionError::Decode(_) => ErrorKind::Decode,
            ConversionError::Encode(_) => ErrorKind::Encode,
            ConversionError::Write(_) => ErrorKind::Write,
            ConversionError::WorkerSpawn(_) | ConversionError::WorkerPanicked => ErrorKind::Worker,
        }
    }

    pub(crate) fn write(context: &str, error: IoError) -> Self {
        ConversionError::Write(format!("{context}: {error}"))
    }

    pub(crate) fn from_gif(context: &str, error: EncodingError) -> Self {
        match error {
            EncodingError::Io(io) => ConversionError::write(context, io),
            other => ConversionError::Encode(format!("{context}: {other}")),
        }
    }
}
