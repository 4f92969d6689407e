//! Pacing between remote operations.
//!
//! Pacing is best effort: it spaces out clones and pulls so a scheduled run
//! does not hammer the remote host, and it gives way immediately when the
//! run is cancelled.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Sleep granularity while waiting, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Upper bound on the configured base delay.
pub const MAX_BASE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay policy between successive remote operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    None,
    Fixed(Duration),
    /// Uniformly drawn from 50%..=150% of the base delay.
    Jittered(Duration),
}

impl Pacing {
    /// Build from configuration values. Non-positive or non-finite seconds
    /// disable pacing; anything above [`MAX_BASE_DELAY`] is clamped to it.
    pub fn from_seconds(seconds: f64, randomize: bool) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self::None;
        }
        let base = Duration::try_from_secs_f64(seconds)
            .unwrap_or(MAX_BASE_DELAY)
            .min(MAX_BASE_DELAY);
        if randomize {
            Self::Jittered(base)
        } else {
            Self::Fixed(base)
        }
    }

    /// Draw the next delay.
    pub fn next_delay(&self) -> Duration {
        self.delay_with(&mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(base) => base,
            Self::Jittered(base) => {
                let secs = base.as_secs_f64();
                Duration::from_secs_f64(rng.gen_range(secs * 0.5..=secs * 1.5))
            }
        }
    }
}

/// Shared gate in front of every remote operation of a run.
///
/// The first operation starts immediately. Each later one waits until one
/// pacing delay has passed since the previous operation finished, or since
/// the previous start when several workers share the gate.
pub struct Throttle<'a> {
    pacing: Pacing,
    next_slot: Mutex<Option<Instant>>,
    cancel: &'a AtomicBool,
}

impl<'a> Throttle<'a> {
    pub fn new(pacing: Pacing, cancel: &'a AtomicBool) -> Self {
        Self {
            pacing,
            next_slot: Mutex::new(None),
            cancel,
        }
    }

    /// Block until a remote operation may start.
    /// Returns false if the run was cancelled while waiting.
    pub fn acquire(&self) -> bool {
        let start = {
            let mut slot = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let start = match *slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *slot = Some(later(start, self.pacing.next_delay()));
            start
        };

        let wait = start.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            log::debug!("Pacing: waiting {:.2}s", wait.as_secs_f64());
        }
        sleep_unless_cancelled(wait, self.cancel)
    }

    /// Mark the end of a remote operation; the next one waits a full delay
    /// from now.
    pub fn release(&self) {
        let mut slot = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let earliest = later(Instant::now(), self.pacing.next_delay());
        *slot = Some(match *slot {
            Some(next) if next > earliest => next,
            _ => earliest,
        });
    }
}

/// `at + delay`, saturating instead of overflowing.
fn later(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(MAX_BASE_DELAY))
        .unwrap_or(at)
}

/// Sleep for `duration` in small slices. Returns false as soon as `cancel`
/// is set. A duration too long to represent sleeps until cancelled.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now().checked_add(duration);
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => SLEEP_SLICE,
        };
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}
