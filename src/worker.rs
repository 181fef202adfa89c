//! Background conversion runs.
//!
//! [`spawn_conversion`] moves a conversion onto its own OS thread so decoding
//! and encoding never block the caller's event loop. The returned
//! [`ConversionHandle`] is the only link back: poll it for progress and state,
//! then [`join`](ConversionHandle::join) for the outcome.
//!
//! All conversion resources (the decoder, the encoder, its staging file) are
//! created and dropped on the worker thread. Only the progress slot and the
//! status are shared.
//!
//! At most one conversion should run per interactive form. The handle does
//! not enforce this; callers disable their "convert" control while a handle
//! is live.
//!
//! # Example
//!
//! ```no_run
//! use std::{thread, time::Duration};
//!
//! use vidgif::{ConversionRequest, spawn_conversion};
//!
//! let request = ConversionRequest::builder("input.mp4", "out").frame_rate(12).build()?;
//! let handle = spawn_conversion(request)?;
//!
//! while !handle.is_finished() {
//!     if let Some(percent) = handle.poll_progress() {
//!         println!("{percent:.2}%");
//!     }
//!     thread::sleep(Duration::from_millis(100));
//! }
//! let gif = handle.join()?;
//! # Ok::<(), vidgif::ConversionError>(())
//! ```

use std::thread::{self, JoinHandle};

use crate::convert::{ConversionOutcome, ConversionState, ConversionStatus, convert};
use crate::error::ConversionError;
use crate::progress::{ProgressReceiver, progress_channel};
use crate::request::ConversionRequest;

/// Name given to conversion worker threads.
const WORKER_THREAD_NAME: &str = "vidgif-convert";

/// Handle to a conversion running on a background thread.
#[derive(Debug)]
pub struct ConversionHandle {
    progress: ProgressReceiver,
    status: ConversionStatus,
    thread: JoinHandle<ConversionOutcome>,
}

impl ConversionHandle {
    /// The most recent progress percentage since the last poll, if any.
    pub fn poll_progress(&self) -> Option<f32> {
        self.progress.poll()
    }

    /// The run's current stage.
    pub fn state(&self) -> ConversionState {
        self.status.state()
    }

    /// A clone of the run's shared status.
    pub fn status(&self) -> ConversionStatus {
        self.status.clone()
    }

    /// Whether the worker has stopped, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns the conversion's own error, or
    /// [`ConversionError::WorkerPanicked`] if the worker thread panicked.
    pub fn join(self) -> ConversionOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                if !self.status.state().is_terminal() {
                    self.status.transition(ConversionState::Failed);
                }
                Err(ConversionError::WorkerPanicked)
            }
        }
    }
}

/// Start converting `request` on a new thread.
///
/// # Errors
///
/// Returns [`ConversionError::WorkerSpawn`] if the OS refuses to create the
/// thread.
pub fn spawn_conversion(request: ConversionRequest) -> Result<ConversionHandle, ConversionError> {
    let (sender, receiver) = progress_channel();
    let status = ConversionStatus::new();
    let worker_status = status.clone();

    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || convert(&request, &sender, &worker_status))
        .map_err(|e| {
            log::error!("Failed to spawn conversion worker: {e}");
            ConversionError::WorkerSpawn(e)
        })?;

    Ok(ConversionHandle {
        progress: receiver,
        status,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_source_fails_on_worker() {
        let dir = tempfile::tempdir().unwrap();
        let request = ConversionRequest::builder(dir.path().join("gone.mp4"), dir.path())
            .frame_rate(12)
            .build()
            .unwrap();
        let output = request.output_path().to_path_buf();

        let handle = spawn_conversion(request).unwrap();
        let status = handle.status();
        let error = handle.join().unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ResourceOpen);
        assert_eq!(status.state(), ConversionState::Failed);
        assert!(!output.exists());
    }
}
