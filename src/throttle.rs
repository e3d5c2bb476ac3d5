//! Adaptive throttling driven by consecutive transport failures.
//!
//! [`ErrorState`] counts failed transport calls since the last success.
//! [`ThrottleController`] reads it and derives the inter-request delay and
//! the concurrency the fetcher may use right now.
//!
//! # Modes
//!
//! | consecutive failures | mode | delay | concurrency |
//! |---|---|---|---|
//! | `<= 5` | aggressive | base | base |
//! | `6..=10` | moderate | 2 × base | base |
//! | `11..=20` | degraded | 5 × base | `max(floor, base × 10 / failures)` |
//! | `> 20` | recovery | 10 × base | `min(floor, base)` |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::throttle::ThrottleController;
//!
//! let throttle = ThrottleController::new(Duration::from_millis(100), 25);
//! for _ in 0..21 {
//!     throttle.observe(false);
//! }
//! assert!(throttle.current_concurrency(100) <= 25);
//!
//! throttle.observe(true);
//! assert_eq!(throttle.consecutive_failures(), 0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, info};

/// Failure count at or below which the controller runs at full speed.
pub const LOW_THRESHOLD: u32 = 5;

/// Failure count above which concurrency starts shrinking.
pub const MID_THRESHOLD: u32 = 10;

/// Failure count above which concurrency collapses to the floor.
pub const HIGH_THRESHOLD: u32 = 20;

/// Default concurrency floor used while the server recovers.
pub const DEFAULT_CONCURRENCY_FLOOR: usize = 25;

/// Counter of consecutive failed transport calls.
///
/// Updated with atomic increment/reset so concurrent tasks never lose an
/// update; a decision made from a slightly stale value is acceptable.
#[derive(Debug, Default)]
pub struct ErrorState {
    consecutive_failures: AtomicU32,
}

impl ErrorState {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call result and returns the new counter value.
    pub fn observe(&self, success: bool) -> u32 {
        if success {
            self.consecutive_failures.swap(0, Ordering::SeqCst);
            0
        } else {
            self.consecutive_failures
                .fetch_add(1, Ordering::SeqCst)
                .saturating_add(1)
        }
    }

    /// Current number of consecutive failures.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

/// Operating mode derived from the failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleMode {
    /// Minimal delay, full concurrency.
    Aggressive,
    /// Longer delay, full concurrency.
    Moderate,
    /// Long delay, concurrency shrinking with the failure count.
    Degraded,
    /// Longest delay, concurrency pinned to the floor.
    Recovery,
}

impl ThrottleMode {
    /// Mode for a given failure count.
    #[must_use]
    pub fn for_failures(failures: u32) -> Self {
        match failures {
            0..=LOW_THRESHOLD => Self::Aggressive,
            f if f <= MID_THRESHOLD => Self::Moderate,
            f if f <= HIGH_THRESHOLD => Self::Degraded,
            _ => Self::Recovery,
        }
    }

    fn delay_multiplier(self) -> u32 {
        match self {
            Self::Aggressive => 1,
            Self::Moderate => 2,
            Self::Degraded => 5,
            Self::Recovery => 10,
        }
    }
}

/// Derives delay and concurrency from a shared [`ErrorState`].
///
/// Cheap to clone; clones share the same counter. Each entity owns its own
/// controller so one struggling entity does not slow down the others.
#[derive(Debug, Clone)]
pub struct ThrottleController {
    state: Arc<ErrorState>,
    base_delay: Duration,
    floor: usize,
}

impl ThrottleController {
    /// Creates a controller with its own counter.
    #[must_use]
    pub fn new(base_delay: Duration, floor: usize) -> Self {
        Self {
            state: Arc::new(ErrorState::new()),
            base_delay,
            floor: floor.max(1),
        }
    }

    /// Creates a controller whose base delay is `1s / requests_per_second`.
    ///
    /// A rate of zero disables the base delay.
    #[must_use]
    pub fn from_rate(requests_per_second: u32, floor: usize) -> Self {
        let base_delay = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / requests_per_second
        };
        Self::new(base_delay, floor)
    }

    /// Records a transport call result.
    pub fn observe(&self, success: bool) {
        let before = self.state.get();
        let after = self.state.observe(success);
        let (old_mode, new_mode) = (
            ThrottleMode::for_failures(before),
            ThrottleMode::for_failures(after),
        );
        if old_mode != new_mode {
            if new_mode == ThrottleMode::Aggressive {
                info!(failures = before, "server recovered, resuming full speed");
            } else {
                info!(failures = after, mode = ?new_mode, "throttling mode changed");
            }
        }
    }

    /// Current number of consecutive failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.get()
    }

    /// Current operating mode.
    #[must_use]
    pub fn mode(&self) -> ThrottleMode {
        ThrottleMode::for_failures(self.state.get())
    }

    /// Delay to apply before the next request.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.base_delay * self.mode().delay_multiplier()
    }

    /// Concurrency permitted right now, given the configured `base`.
    #[must_use]
    pub fn current_concurrency(&self, base: usize) -> usize {
        let base = base.max(1);
        let failures = self.state.get();
        let concurrency = match ThrottleMode::for_failures(failures) {
            ThrottleMode::Aggressive | ThrottleMode::Moderate => base,
            ThrottleMode::Degraded => {
                let scaled = base.saturating_mul(MID_THRESHOLD as usize) / failures as usize;
                scaled.max(self.floor).min(base)
            }
            ThrottleMode::Recovery => self.floor.min(base),
        };
        debug!(failures, base, concurrency, "computed concurrency");
        concurrency
    }

    /// Base delay at full speed.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}
