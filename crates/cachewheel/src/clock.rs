// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The time source used by the cache for bucket rotation and expiration.
///
/// Bucket start times, expiration thresholds and the validity-check deadline are all read from
/// this clock. In production use [`Clock::system`]. In tests, drive time explicitly through a
/// [`ClockControl`] so that time-based eviction can be exercised without real delays.
///
/// Cloning a clock is inexpensive and every clone observes the same time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachewheel::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let before = clock.now();
/// control.advance(Duration::from_secs(5));
///
/// assert_eq!(clock.now() - before, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Clock(ClockState);

#[derive(Debug, Clone, Default)]
enum ClockState {
    #[default]
    System,
    Control(ClockControl),
}

impl Clock {
    /// Creates a clock that reads the monotonic system time.
    #[must_use]
    pub fn system() -> Self {
        Self(ClockState::System)
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now(&self) -> Instant {
        match &self.0 {
            ClockState::System => Instant::now(),
            ClockState::Control(control) => control.now(),
        }
    }
}

/// Controls the flow of time for a [`Clock`].
///
/// Time starts at the instant the control was created and only moves when
/// [`advance`](Self::advance) is called. All clocks created from the same control (and their
/// clones) share the same time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachewheel::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
/// let start = clock.now();
///
/// control.advance(Duration::from_millis(250));
/// control.advance(Duration::from_millis(750));
///
/// assert_eq!(clock.now().duration_since(start), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct ClockControl {
    state: Arc<Mutex<ControlState>>,
}

#[derive(Debug)]
struct ControlState {
    origin: Instant,
    elapsed: Duration,
}

impl ClockControl {
    /// Creates a new control with time frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Creates a [`Clock`] driven by this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock(ClockState::Control(self.clone()))
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.elapsed = state.elapsed.saturating_add(duration);
    }

    /// Returns the controlled current instant.
    #[must_use]
    pub fn now(&self) -> Instant {
        let state = self.state.lock();
        state.origin + state.elapsed
    }
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}
