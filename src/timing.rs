use crate::Error;
use embedded_time::{clock, duration::Microseconds, rate::Fraction, Clock, Instant};
use log::warn;

/// Smoothed time (in seconds) between control cycles.
///
/// Each raw delta is clamped to `[min, max]` before it is blended into the running average,
/// so a single stalled or duplicated sample can't corrupt every integral downstream.
pub struct DeltaTime<C> {
    clock: C,
    last_us: Option<u32>,
    average: f32,
    min: f32,
    max: f32,
    alpha: f32,
}

impl<C> DeltaTime<C>
where
    C: Clock<T = u32>,
{
    /// Create a new estimator starting at the `expected` period (in seconds).
    pub fn new(clock: C, expected: f32, min: f32, max: f32, alpha: f32) -> Self {
        let mut me = Self {
            clock,
            last_us: None,
            average: expected,
            min,
            max,
            alpha,
        };
        me.last_us = me.micros_since_epoch().ok().map(|us| us.0);
        me
    }

    /// Read the clock and return the updated average period (in seconds).
    ///
    /// If the clock can't be read the current average is returned unchanged.
    pub fn sample(&mut self) -> f32 {
        let now = match self.micros_since_epoch() {
            Ok(now) => now.0,
            Err(error) => {
                warn!("stabilization: clock unavailable ({}), keeping dT", error);
                return self.average;
            }
        };

        if let Some(last) = self.last_us.replace(now) {
            let dt = (now.wrapping_sub(last) as f32 * 1.0e-6)
                .max(self.min)
                .min(self.max);
            self.average = self.average * (1. - self.alpha) + dt * self.alpha;
        }

        self.average
    }

    fn micros_since_epoch(&self) -> Result<Microseconds<u32>, Error> {
        let instant = self.clock.try_now()?;
        Microseconds::try_from(instant.duration_since_epoch()).map_err(Into::into)
    }
}

/// A microsecond [`Clock`] backed by the operating system's monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    type T = u32;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
        // Wraps after ~71 minutes, deltas are taken with wrapping arithmetic
        Ok(Instant::new(self.start.elapsed().as_micros() as u32))
    }
}
