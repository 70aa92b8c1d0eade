//! Transport clock and the two timers driven from it: the scheduled note
//! sequence ([`Part`]) and the fixed-cadence [`Interval`].
//!
//! Both run as tokio tasks. Cancelling aborts the task; callers that need
//! a hard "nothing fires after stop" guarantee must also gate the callback
//! itself (see `engine.rs`), since an abort cannot interrupt a callback that
//! is already running on another worker.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::midi::Note;

/// Shared timeline; transport time zero is the instant the clock started.
#[derive(Debug, Clone, Copy)]
pub struct TransportClock {
    origin: Instant,
}

impl TransportClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Wall-clock instant of transport time `seconds`.
    pub fn at(&self, seconds: f64) -> Instant {
        self.origin + Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Seconds since transport time zero.
    pub fn position(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A note sequence scheduled against a [`TransportClock`].
pub struct Part {
    handle: Option<JoinHandle<()>>,
    len: usize,
}

impl Part {
    /// Schedule `notes` (time-ordered) and start immediately. `on_note` runs
    /// at each note's start time; returning `Break` ends the part early.
    pub fn start<F>(clock: TransportClock, notes: Vec<Note>, mut on_note: F) -> Self
    where
        F: FnMut(&Note) -> ControlFlow<()> + Send + 'static,
    {
        let len = notes.len();
        let handle = tokio::spawn(async move {
            for note in &notes {
                sleep_until(clock.at(note.time)).await;
                if on_note(note).is_break() {
                    return;
                }
            }
        });

        Self {
            handle: Some(handle),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once every note has been handed to the callback (or the part
    /// was disposed).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Part {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Repeating timer. The first tick fires one period after start.
pub struct Interval {
    handle: Option<JoinHandle<()>>,
}

impl Interval {
    /// `on_tick` returning `Break` cancels the timer from the inside.
    pub fn start<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut next = Instant::now() + period;
            loop {
                sleep_until(next).await;
                if on_tick().is_break() {
                    return;
                }
                next += period;
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        self.cancel();
    }
}
