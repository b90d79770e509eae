use num_traits::{Float, FloatConst};

/// Time constants below this (in seconds) produce a decay coefficient of zero.
pub const MIN_TIME_CONSTANT: f32 = 0.0001;

/// Fixed step (in seconds) time constants are converted against.
///
/// The real loop period jitters from cycle to cycle and differs between boards;
/// a fixed step keeps the filters identical regardless of the update rate.
pub const REFERENCE_DT: f32 = 0.0025;

/// Convert a time constant `tau` (in seconds) to the per-step decay `exp(-dt / tau)`.
///
/// Returns zero for `tau` below [`MIN_TIME_CONSTANT`] instead of relying on
/// `exp` of a huge negative value to round to zero.
pub fn decay_coefficient<T: Float>(dt: T, tau: T) -> T {
    match T::from(MIN_TIME_CONSTANT) {
        Some(min) if tau >= min => (-dt / tau).exp(),
        _ => T::zero(),
    }
}

/// Time constant (in seconds) of a first order low-pass with the given cutoff (in hz).
/// Returns `None` for a non-positive cutoff, which disables the filtered term.
pub fn time_constant<T: Float + FloatConst>(cutoff_freq: T) -> Option<T> {
    if cutoff_freq <= T::zero() {
        return None;
    }

    Some(T::one() / (T::TAU() * cutoff_freq))
}

/// First order exponential smoother: `output = output * alpha + sample * (1 - alpha)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LowPassFilter<T> {
    output: T,
    alpha: T,
}

impl<T: Float> Default for LowPassFilter<T> {
    fn default() -> Self {
        Self {
            output: T::zero(),
            alpha: T::zero(),
        }
    }
}

impl<T: Float> LowPassFilter<T> {
    pub fn with_alpha(alpha: T) -> Self {
        Self {
            output: T::zero(),
            alpha,
        }
    }

    pub fn apply(&mut self, sample: T) -> T {
        self.output = self.output * self.alpha + sample * (T::one() - self.alpha);
        self.output
    }

    pub fn output(&self) -> T {
        self.output
    }

    pub fn alpha(&self) -> T {
        self.alpha
    }

    /// Change the decay coefficient without disturbing the filtered value.
    pub fn set_alpha(&mut self, alpha: T) {
        self.alpha = alpha;
    }
}
