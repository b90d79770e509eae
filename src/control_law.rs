//! Per-axis control laws, dispatched on the axis' [`StabilizationMode`].

use crate::axis::Axis;
use crate::bound;
use crate::collaborator::{FlybarInput, RelayTuner, VirtualFlybar};
use crate::mode::StabilizationMode;
use crate::pid::PidRole;
use crate::stabilizer::Stabilizer;

/// Anti-windup curve offset of the attitude controllers.
const ATTITUDE_WINDUP_OFFSET: f32 = 7.966;

/// Anti-windup curve offset of the rate controllers.
const RATE_WINDUP_OFFSET: f32 = 17.668;

/// Everything one control law needs for one axis in one cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AxisInput {
    pub axis: Axis,
    pub mode: StabilizationMode,
    /// The mode differs from the previous cycle's.
    pub reinit: bool,
    pub stick: f32,
    /// Measured angle (in degrees).
    pub attitude: f32,
    /// Attitude error (in degrees).
    pub error: f32,
    /// Filtered rate (in degrees/second).
    pub gyro: f32,
    /// Rattitude blend, 0 at center stick and 1 at full stick.
    pub magnitude: f32,
    /// Airspeed scaling of the rate loops.
    pub scale: f32,
    pub dt: f32,
}

impl<V, R> Stabilizer<V, R>
where
    V: VirtualFlybar,
    R: RelayTuner,
{
    /// Run the control law of `input.mode`, writing the axis command and rate setpoint.
    ///
    /// Returns `false` for an unrecognized mode, in which case neither output is touched.
    pub(crate) fn run_axis(
        &mut self,
        input: &AxisInput,
        actuator: &mut f32,
        rate: &mut f32,
    ) -> bool {
        let axis = input.axis;

        match input.mode {
            StabilizationMode::Rate => {
                self.reinit(input, &[PidRole::Rate]);

                *rate = bound(input.stick, self.bank.manual_rate[axis]);
                *actuator = self.rate_loop(PidRole::Rate, input, *rate);
            }
            StabilizationMode::Attitude => {
                self.reinit(input, &[PidRole::Attitude, PidRole::Rate]);

                *rate = bound(
                    self.pids[(PidRole::Attitude, axis)].apply(input.error, input.dt),
                    self.bank.maximum_rate[axis],
                );
                *actuator = self.rate_loop(PidRole::Rate, input, *rate);
            }
            StabilizationMode::Rattitude => {
                self.reinit(
                    input,
                    &[PidRole::Attitude, PidRole::Rate, PidRole::RattitudeRate],
                );
                self.rattitude(input, actuator, rate);
            }
            StabilizationMode::VirtualBar => {
                // Passed through for diagnostics only
                *rate = input.stick;

                let flybar_input = FlybarInput {
                    axis,
                    gyro: input.gyro,
                    command: input.stick,
                    dt: input.dt,
                    reinit: input.reinit,
                    decay: self.coefficients.vbar_decay,
                };
                self.flybar
                    .stabilize(&flybar_input, &self.settings.virtual_bar, actuator);
                *actuator = bound(*actuator, 1.);
            }
            StabilizationMode::WeakLeveling => {
                self.reinit(input, &[PidRole::Rate]);

                let leveling = bound(
                    input.error * self.settings.weak_leveling_kp,
                    self.settings.max_weak_leveling_rate,
                );
                *rate = input.stick + leveling;
                *actuator = self.rate_loop(PidRole::Rate, input, *rate);
            }
            StabilizationMode::AxisLock => {
                self.reinit(input, &[PidRole::Attitude, PidRole::Rate]);
                let lock = &mut self.axes[axis].lock_accumulator;
                if input.reinit {
                    *lock = 0.;
                }

                if input.stick.abs() > self.settings.max_axis_lock_rate {
                    *rate = input.stick;
                    *lock = 0.;
                } else {
                    *lock = bound(
                        *lock + (input.stick - input.gyro) * input.dt,
                        self.settings.max_axis_lock,
                    );
                    let held = *lock;
                    *rate = self.pids[(PidRole::Attitude, axis)].apply(held, input.dt);
                }

                *rate = bound(*rate, self.bank.manual_rate[axis]);
                *actuator = self.rate_loop(PidRole::Rate, input, *rate);
            }
            StabilizationMode::RelayRate => {
                *rate = bound(input.stick, self.bank.manual_rate[axis]);
                self.relay
                    .relay_rate(axis, *rate - input.gyro, actuator, input.reinit);
                *actuator = bound(*actuator, 1.);
            }
            StabilizationMode::RelayAttitude => {
                self.reinit(input, &[PidRole::Attitude]);

                *rate = bound(
                    self.pids[(PidRole::Attitude, axis)].apply(input.error, input.dt),
                    self.bank.maximum_rate[axis],
                );
                self.relay
                    .relay_rate(axis, *rate - input.gyro, actuator, input.reinit);
                *actuator = bound(*actuator, 1.);
            }
            StabilizationMode::None => {
                *actuator = bound(input.stick, 1.);
            }
            StabilizationMode::Unrecognized(_) => return false,
        }

        true
    }

    /// Attitude hold at center stick, blending into Rate towards full stick.
    fn rattitude(&mut self, input: &AxisInput, actuator: &mut f32, rate: &mut f32) {
        let axis = input.axis;
        let magnitude = input.magnitude;

        let rate_from_stick = bound(input.stick, 1.) * self.bank.manual_rate[axis];

        // Full stick maps to the bank's max angle
        let attitude_error = input.stick * self.bank.max_angle[axis] - input.attitude;
        let rate_from_attitude = bound(
            self.pids[(PidRole::Attitude, axis)].apply(attitude_error, input.dt),
            self.bank.maximum_rate[axis],
        );

        *rate = (1. - magnitude) * rate_from_attitude + magnitude * rate_from_stick;

        let attitude_output = self.pids[(PidRole::RattitudeRate, axis)].apply_setpoint(
            input.scale,
            *rate,
            input.gyro,
            input.dt,
        );
        let rate_output = self.pids[(PidRole::Rate, axis)].apply_setpoint(
            input.scale,
            *rate,
            input.gyro,
            input.dt,
        );

        *actuator = bound(
            (1. - magnitude) * attitude_output + magnitude * rate_output,
            1.,
        );

        self.rattitude_anti_windup(axis, magnitude, input.dt);
    }

    /// Decay the integrals of whichever law has lost authority in the blend.
    fn rattitude_anti_windup(&mut self, axis: Axis, magnitude: f32, dt: f32) {
        let strength = self.settings.rattitude_anti_windup;
        if dt <= 0. || strength == 0 {
            return;
        }

        let controllers = [
            (PidRole::Attitude, ATTITUDE_WINDUP_OFFSET, magnitude),
            (PidRole::RattitudeRate, RATE_WINDUP_OFFSET, magnitude),
            (PidRole::Rate, RATE_WINDUP_OFFSET, 1. - magnitude),
        ];
        for (role, offset, x) in controllers {
            let pid = &mut self.pids[(role, axis)];
            if pid.ki > 0. {
                pid.decay_integral(anti_windup_factor(x, offset, dt * pid.ki, strength));
            }
        }
    }

    fn reinit(&mut self, input: &AxisInput, roles: &[PidRole]) {
        if input.reinit {
            for role in roles {
                self.pids[(*role, input.axis)].reset_integral();
            }
        }
    }

    fn rate_loop(&mut self, role: PidRole, input: &AxisInput, setpoint: f32) -> f32 {
        let output = self.pids[(role, input.axis)].apply_setpoint(
            input.scale,
            setpoint,
            input.gyro,
            input.dt,
        );
        bound(output, 1.)
    }
}

/// Integral decay factor `1 - x^power` of the Rattitude anti-windup.
///
/// `x` is the share of authority the controller has lost. The exponent shrinks as
/// `dt * ki` grows, so controllers that integrate quickly are decayed harder, and
/// drops further with `strength`.
pub fn anti_windup_factor(x: f32, offset: f32, dt_ki: f32, strength: u8) -> f32 {
    let base = (32.1 - offset - dt_ki.log2()).floor().max(0.).min(255.);
    let power = (base - f32::from(strength)).max(0.).min(31.);
    1. - x.max(0.).min(1.).powi(power as i32)
}
