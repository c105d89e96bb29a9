//! Time Management
//!
//! Timing helpers for the audio thread:
//! - `DeltaTime` passed to every per-tick update
//! - `Stopwatch` for pacing the audio thread loop
//! - `Countdown` for fixed-lifetime trigger instances

use std::time::{Duration, Instant};

/// Delta time wrapper for type safety
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DeltaTime(pub f64);

impl DeltaTime {
    /// Create a new delta time from seconds
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Create a new delta time from milliseconds
    pub fn from_millis(millis: f64) -> Self {
        Self(millis / 1000.0)
    }

    /// Get the delta time in seconds
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Get the delta time in milliseconds
    pub fn as_millis(&self) -> f64 {
        self.0 * 1000.0
    }

    /// Get the delta time as f32 seconds
    pub fn as_secs_f32(&self) -> f32 {
        self.0 as f32
    }
}

impl Default for DeltaTime {
    fn default() -> Self {
        Self(1.0 / 60.0)
    }
}

impl From<Duration> for DeltaTime {
    fn from(duration: Duration) -> Self {
        Self(duration.as_secs_f64())
    }
}

/// Stopwatch for measuring elapsed time between ticks
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Create and start a new stopwatch
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Return the time since the last lap and restart
    pub fn lap(&mut self) -> DeltaTime {
        let now = Instant::now();
        let elapsed = now - self.start;
        self.start = now;
        DeltaTime::from(elapsed)
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Millisecond countdown that fires once
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    duration_ms: f32,
    remaining_ms: f32,
    fired: bool,
}

impl Countdown {
    /// Create a countdown of `duration_ms` milliseconds
    pub fn from_millis(duration_ms: f32) -> Self {
        let duration_ms = duration_ms.max(0.0);
        Self {
            duration_ms,
            remaining_ms: duration_ms,
            fired: false,
        }
    }

    /// Advance by `delta`; returns true exactly once, on the tick it expires
    ///
    /// A zero-length countdown fires on its first tick.
    pub fn tick(&mut self, delta: DeltaTime) -> bool {
        if self.fired {
            return false;
        }

        self.remaining_ms = (self.remaining_ms - delta.as_millis() as f32).max(0.0);
        self.fired = self.remaining_ms <= 0.0;
        self.fired
    }

    /// Check if the countdown has fired
    pub fn is_expired(&self) -> bool {
        self.fired
    }

    /// Total duration in milliseconds
    pub fn duration_ms(&self) -> f32 {
        self.duration_ms
    }

    /// Remaining time in milliseconds
    pub fn remaining_ms(&self) -> f32 {
        self.remaining_ms
    }
}
