//! Async conversion.
//!
//! [`convert_async`] runs a conversion on Tokio's blocking thread pool and
//! returns a [`ConversionFuture`] for the outcome alongside the
//! [`ProgressReceiver`] to poll while it runs. Decoding and encoding are
//! CPU-heavy, so they stay off the runtime's cooperative worker threads.
//!
//! # Example
//!
//! ```no_run
//! use vidgif::{ConversionRequest, convert_async};
//!
//! # async fn example() -> Result<(), vidgif::ConversionError> {
//! let request = ConversionRequest::builder("input.mp4", "out").frame_rate(12).build()?;
//! let (future, progress) = convert_async(request);
//! let gif = future.await?;
//! assert_eq!(progress.latest(), 100.0);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::convert::{ConversionOutcome, ConversionStatus, convert};
use crate::error::ConversionError;
use crate::progress::{ProgressReceiver, progress_channel};
use crate::request::ConversionRequest;

/// A future that resolves to a conversion's outcome.
///
/// Dropping the future does not stop the conversion: the blocking task runs
/// to completion or failure.
pub struct ConversionFuture {
    handle: JoinHandle<ConversionOutcome>,
    status: ConversionStatus,
}

impl ConversionFuture {
    /// The run's shared status.
    pub fn status(&self) -> &ConversionStatus {
        &self.status
    }
}

impl Future for ConversionFuture {
    type Output = ConversionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(ConversionError::WorkerPanicked)))
    }
}

/// Start converting `request` on Tokio's blocking pool.
///
/// Must be called from within a Tokio runtime.
pub fn convert_async(request: ConversionRequest) -> (ConversionFuture, ProgressReceiver) {
    let (sender, receiver) = progress_channel();
    let status = ConversionStatus::new();
    let worker_status = status.clone();

    let handle =
        tokio::task::spawn_blocking(move || convert(&request, &sender, &worker_status));

    (ConversionFuture { handle, status }, receiver)
}
