//! Phase Time Frames
//!
//! An immutable interval with a start instant and a duration. A frame can
//! also be "unstarted": it has a known duration but no start yet, and an
//! unstarted frame never expires.

use std::time::Duration;
use tokio::time::Instant;

/// An immutable time interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeFrame {
    start: Option<Instant>,
    duration: Duration,
}

impl TimeFrame {
    /// A frame of known duration that has not started yet.
    pub const fn unstarted(duration: Duration) -> Self {
        Self { start: None, duration }
    }

    /// A frame that started at `start`.
    pub const fn started(start: Instant, duration: Duration) -> Self {
        Self { start: Some(start), duration }
    }

    /// A frame starting now.
    pub fn start_now(duration: Duration) -> Self {
        Self::started(Instant::now(), duration)
    }

    /// The frame's duration.
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the frame has a start instant.
    pub const fn has_started(&self) -> bool {
        self.start.is_some()
    }

    /// The instant the frame ends, if started.
    pub fn end_time(&self) -> Option<Instant> {
        self.start.map(|s| s + self.duration)
    }

    /// Time left until the end, zero once expired, full duration if unstarted.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.end_time() {
            Some(end) => end.saturating_duration_since(now),
            None => self.duration,
        }
    }

    /// Whether the frame has started and its end has passed.
    pub fn has_expired(&self, now: Instant) -> bool {
        match self.end_time() {
            Some(end) => now >= end,
            None => false,
        }
    }
}
