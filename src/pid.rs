//! PID controllers for the rate (inner) and attitude (outer) loops.
//!
//! Every controller keeps its own integral accumulator and derivative filter state.
//! The gains are replaced by [`Pid::configure`] without touching that state,
//! so retuning in flight never bumps the output.

use crate::axis::{Axis, PerAxis};
use crate::filter::time_constant;
use core::ops::{Index, IndexMut};

/// Proportional, integral and derivative gains with the integral limit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub i_limit: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32, i_limit: f32) -> Self {
        Self { kp, ki, kd, i_limit }
    }

    /// Gains for a proportional-integral controller.
    pub const fn pi(kp: f32, ki: f32, i_limit: f32) -> Self {
        Self::new(kp, ki, 0., i_limit)
    }
}

/// Low-pass filter applied to the derivative term.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DerivativeFilter {
    /// Filter time constant in seconds, `None` disables the derivative term.
    pub tau: Option<f32>,

    /// Weight of the setpoint in the derivative input of [`Pid::apply_setpoint`].
    /// At zero the derivative only sees the measurement.
    pub gamma: f32,
}

impl DerivativeFilter {
    /// Create a filter from a cutoff frequency (in hz) and setpoint weight.
    pub fn new(cutoff_hz: f32, gamma: f32) -> Self {
        Self {
            tau: time_constant(cutoff_hz),
            gamma,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pid {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub i_limit: f32,
    integrator: f32,
    last_input: f32,
    last_derivative: f32,
    derivative: DerivativeFilter,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        let mut pid = Self::default();
        pid.configure(gains);
        pid
    }

    /// Replace the gains, leaving the accumulator and filter state untouched.
    pub fn configure(&mut self, gains: PidGains) {
        self.kp = gains.kp;
        self.ki = gains.ki;
        self.kd = gains.kd;
        self.i_limit = gains.i_limit;
    }

    pub fn gains(&self) -> PidGains {
        PidGains::new(self.kp, self.ki, self.kd, self.i_limit)
    }

    pub fn configure_derivative(&mut self, derivative: DerivativeFilter) {
        self.derivative = derivative;
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    /// Clear the integral accumulator.
    pub fn reset_integral(&mut self) {
        self.integrator = 0.;
    }

    /// Multiply the integral accumulator by `factor` (in [0, 1] to only ever shrink it).
    pub fn decay_integral(&mut self, factor: f32) {
        self.integrator *= factor;
    }

    /// Clear the accumulator and the derivative filter.
    pub fn zero(&mut self) {
        self.integrator = 0.;
        self.last_input = 0.;
        self.last_derivative = 0.;
    }

    /// Outer loop form: run the controller on an already computed `error`.
    pub fn apply(&mut self, error: f32, dt: f32) -> f32 {
        let diff = error - self.last_input;
        self.last_input = error;

        self.update_integral(error * self.ki * dt);
        let d_out = self.derivative_term(diff, dt);

        error * self.kp + self.integrator + d_out
    }

    /// Inner loop form: control `measurement` towards `setpoint`.
    ///
    /// `scale` compensates for airspeed dependent control authority and multiplies
    /// the proportional and derivative terms and the integral increment.
    pub fn apply_setpoint(&mut self, scale: f32, setpoint: f32, measurement: f32, dt: f32) -> f32 {
        let error = setpoint - measurement;
        self.update_integral(error * scale * self.ki * dt);

        // Differentiate the (weighted) measurement, not the error, so setpoint steps don't kick
        let input = self.derivative.gamma * setpoint - measurement;
        let diff = input - self.last_input;
        self.last_input = input;
        let d_out = self.derivative_term(diff * scale, dt);

        error * scale * self.kp + self.integrator + d_out
    }

    fn update_integral(&mut self, delta: f32) {
        let limit = self.i_limit.abs();
        self.integrator = (self.integrator + delta).max(-limit).min(limit);
    }

    fn derivative_term(&mut self, diff: f32, dt: f32) -> f32 {
        match self.derivative.tau {
            Some(tau) if self.kd > 0. && dt > 0. => {
                let d = self.last_derivative
                    + dt / (dt + tau) * (diff * self.kd / dt - self.last_derivative);
                self.last_derivative = d;
                d
            }
            _ => 0.,
        }
    }
}

/// Role a controller plays in the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PidRole {
    /// Inner loop of Rate, Attitude, WeakLeveling and AxisLock.
    Rate,
    /// Outer loop turning an angle error into a rate.
    Attitude,
    /// Second inner loop of Rattitude, mirroring the [`PidRole::Rate`] gains.
    RattitudeRate,
}

impl PidRole {
    const fn index(self) -> usize {
        match self {
            PidRole::Rate => 0,
            PidRole::Attitude => 1,
            PidRole::RattitudeRate => 2,
        }
    }
}

/// The nine controllers of the stabilizer, one per (role, axis).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PidBank {
    controllers: [PerAxis<Pid>; 3],
}

impl PidBank {
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pid> {
        self.controllers.iter_mut().flat_map(|axes| axes.0.iter_mut())
    }

    /// Clear every accumulator and derivative filter.
    pub fn zero(&mut self) {
        self.iter_mut().for_each(Pid::zero);
    }

    pub fn configure_derivative(&mut self, derivative: DerivativeFilter) {
        self.iter_mut()
            .for_each(|pid| pid.configure_derivative(derivative));
    }
}

impl Index<(PidRole, Axis)> for PidBank {
    type Output = Pid;

    fn index(&self, (role, axis): (PidRole, Axis)) -> &Pid {
        &self.controllers[role.index()][axis]
    }
}

impl IndexMut<(PidRole, Axis)> for PidBank {
    fn index_mut(&mut self, (role, axis): (PidRole, Axis)) -> &mut Pid {
        &mut self.controllers[role.index()][axis]
    }
}
