//! Progress reporting.
//!
//! This module provides [`ProgressCallback`] for observing a conversion as it
//! runs, [`ProgressInfo`] for detailed progress snapshots, and
//! [`progress_channel`], a single-slot "latest wins" channel for handing the
//! most recent completion percentage from the conversion thread to a polling
//! user interface.
//!
//! # Example
//!
//! ```
//! use vidgif::{ProgressCallback, ProgressInfo, progress_channel};
//!
//! let (sender, receiver) = progress_channel();
//! sender.push(10.0);
//! sender.push(25.0);
//!
//! // Only the latest value is kept.
//! assert_eq!(receiver.poll(), Some(25.0));
//! assert_eq!(receiver.poll(), None);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A snapshot of conversion progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Frames written to the encoder so far.
    pub current: u64,
    /// Frames expected in total (duration × frame rate). An estimate.
    pub total: Option<u64>,
    /// Completion percentage, clamped to 0.0 – 100.0.
    pub percentage: f32,
    /// Wall-clock time elapsed since streaming started.
    pub elapsed: Duration,
}

/// Trait for receiving progress updates during a conversion.
///
/// Implementations must be [`Send`] and [`Sync`] because callbacks are invoked
/// from the conversion worker thread.
///
/// Callbacks are **infallible**: they observe but cannot halt the conversion.
pub trait ProgressCallback: Send + Sync {
    /// Called after every frame and once more with 100.0 on success.
    fn on_progress(&self, info: &ProgressInfo);
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<f32>,
    last: f32,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected latest-wins progress channel.
///
/// The channel holds at most one unread sample. Pushing overwrites any
/// unread sample and never blocks; polling takes the sample if there is one.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let slot = Arc::new(Mutex::new(Slot::default()));
    (
        ProgressSender { slot: slot.clone() },
        ProgressReceiver { slot },
    )
}

/// Producer half of [`progress_channel`].
///
/// Samples are clamped to `0.0..=100.0` and never move backwards: a push
/// lower than the previous one is raised to the previous value.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    slot: Arc<Mutex<Slot>>,
}

impl ProgressSender {
    /// Publish a completion percentage, replacing any unread sample.
    pub fn push(&self, percentage: f32) {
        let mut slot = lock(&self.slot);
        let value = if percentage.is_nan() {
            slot.last
        } else {
            percentage.clamp(0.0, 100.0).max(slot.last)
        };
        slot.last = value;
        slot.value = Some(value);
    }
}

impl ProgressCallback for ProgressSender {
    fn on_progress(&self, info: &ProgressInfo) {
        self.push(info.percentage);
    }
}

/// Consumer half of [`progress_channel`].
#[derive(Debug)]
pub struct ProgressReceiver {
    slot: Arc<Mutex<Slot>>,
}

impl ProgressReceiver {
    /// Take the most recent unread sample, or `None` if nothing new arrived
    /// since the last poll.
    pub fn poll(&self) -> Option<f32> {
        lock(&self.slot).value.take()
    }

    /// The most recent sample ever pushed, read or not.
    pub fn latest(&self) -> f32 {
        lock(&self.slot).last
    }
}

/// Internal helper that tracks progress timing and emits callbacks.
pub(crate) struct ProgressTracker<'a> {
    callback: &'a dyn ProgressCallback,
    total: Option<u64>,
    current: u64,
    start_time: Instant,
    last_percentage: f32,
}

impl<'a> ProgressTracker<'a> {
    /// Create a tracker. A `total` of zero is treated as unknown.
    pub(crate) fn new(callback: &'a dyn ProgressCallback, total: u64) -> Self {
        Self {
            callback,
            total: (total > 0).then_some(total),
            current: 0,
            start_time: Instant::now(),
            last_percentage: 0.0,
        }
    }

    /// Record one written frame and report.
    pub(crate) fn advance(&mut self) {
        self.current += 1;
        let percentage = match self.total {
            Some(total) => (self.current as f32 / total as f32 * 100.0).clamp(0.0, 100.0),
            None => 0.0,
        };
        self.report(percentage);
    }

    /// Unconditionally emit the final 100% report and return it.
    pub(crate) fn finish(&mut self) -> ProgressInfo {
        self.report(100.0)
    }

    fn report(&mut self, percentage: f32) -> ProgressInfo {
        let percentage = percentage.max(self.last_percentage);
        self.last_percentage = percentage;

        let info = ProgressInfo {
            current: self.current,
            total: self.total,
            percentage,
            elapsed: self.start_time.elapsed(),
        };

        self.callback.on_progress(&info);
        info
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    struct Recording(Mutex<Vec<f32>>);

    impl ProgressCallback for Recording {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.lock().unwrap().push(info.percentage);
        }
    }

    #[test]
    fn empty_channel_polls_none() {
        let (_sender, receiver) = progress_channel();
        assert_eq!(receiver.poll(), None);
    }

    #[test]
    fn push_overwrites_unread_sample() {
        let (sender, receiver) = progress_channel();
        sender.push(1.0);
        sender.push(2.0);
        sender.push(3.0);
        assert_eq!(receiver.poll(), Some(3.0));
        assert_eq!(receiver.poll(), None);
        assert_eq!(receiver.latest(), 3.0);
    }

    #[test]
    fn samples_are_clamped_and_monotonic() {
        let (sender, receiver) = progress_channel();
        sender.push(150.0);
        assert_eq!(receiver.poll(), Some(100.0));

        let (sender, receiver) = progress_channel();
        sender.push(-5.0);
        assert_eq!(receiver.poll(), Some(0.0));
        sender.push(40.0);
        sender.push(30.0);
        assert_eq!(receiver.poll(), Some(40.0));
    }

    #[test]
    fn final_sample_visible_across_threads() {
        let (sender, receiver) = progress_channel();
        let producer = thread::spawn(move || {
            for i in 1..=1000 {
                sender.push(i as f32 / 10.0);
            }
        });
        producer.join().unwrap();
        assert_eq!(receiver.poll(), Some(100.0));
    }

    #[test]
    fn tracker_overshoot_clamps_at_100() {
        let recording = Recording(Mutex::new(Vec::new()));
        let mut tracker = ProgressTracker::new(&recording, 4);
        for _ in 0..6 {
            tracker.advance();
        }
        tracker.finish();
        let values = recording.0.lock().unwrap();
        assert_eq!(values.as_slice(), &[25.0, 50.0, 75.0, 100.0, 100.0, 100.0, 100.0]);
    }

    #[test]
    fn tracker_unknown_total_still_finishes_at_100() {
        let recording = Recording(Mutex::new(Vec::new()));
        let mut tracker = ProgressTracker::new(&recording, 0);
        tracker.advance();
        let last = tracker.finish();
        let values = recording.0.lock().unwrap();
        assert_eq!(values.as_slice(), &[0.0, 100.0]);
        assert_eq!(last.current, 1);
        assert_eq!(last.total, None);
    }
}
