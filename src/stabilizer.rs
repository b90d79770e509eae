//! The stabilization context and its control cycle.
//!
//! [`Stabilizer`] owns every piece of mutable state the loop needs: the nine PID
//! controllers, the active bank, the settings and their derived coefficients, and
//! the per-axis mode history. [`Stabilizer::step`] runs one complete cycle;
//! waiting for data and publishing results is left to the
//! [`StabilizationTask`](crate::task::StabilizationTask).

use crate::axis::{Axis, PerAxis};
use crate::collaborator::{RelayTuner, VirtualFlybar};
use crate::control_law::AxisInput;
use crate::cruise::CruiseControl;
use crate::filter::LowPassFilter;
use crate::mode::StabilizationMode;
use crate::pid::{Pid, PidBank, PidRole};
use crate::reconcile::Coefficients;
use crate::settings::{StabilizationBank, StabilizationSettings, SETTINGS_BANKS};
use nalgebra::{UnitQuaternion, Vector3};

/// Targets for the stabilizer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StabilizationDesired {
    /// Roll, pitch and yaw targets. Their meaning depends on the axis mode:
    /// an angle in Attitude, a rate in Rate, a stick position in Rattitude or None.
    pub target: Vector3<f32>,
    pub thrust: f32,
    pub modes: PerAxis<StabilizationMode>,
}

/// Estimated attitude (in degrees).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AttitudeState {
    /// Roll, pitch and yaw.
    pub euler: Vector3<f32>,
    pub quaternion: Option<UnitQuaternion<f32>>,
}

impl AttitudeState {
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            euler: Vector3::new(roll, pitch, yaw),
            quaternion: None,
        }
    }

    fn quaternion(&self) -> UnitQuaternion<f32> {
        self.quaternion.unwrap_or_else(|| euler_to_quaternion(&self.euler))
    }
}

/// Body rates (in degrees/second), the arrival of which triggers a control cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GyroState {
    pub rate: Vector3<f32>,
}

impl GyroState {
    pub fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            rate: Vector3::new(roll, pitch, yaw),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlightStatus {
    pub armed: bool,
    /// The stabilization stage of the control chain is in use.
    pub stabilization_enabled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ManualControl {
    pub throttle: f32,
    pub flight_mode_switch_position: u8,
}

/// Everything besides the gyro the stabilizer reads each cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlInputs {
    pub desired: StabilizationDesired,
    pub attitude: AttitudeState,
    pub flight_status: FlightStatus,
    pub manual: ManualControl,
    /// Calibrated airspeed (in m/s), if measured.
    pub airspeed: Option<f32>,
}

/// Commands for the mixer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ActuatorDesired {
    /// Roll, pitch and yaw commands in [-1, 1].
    pub command: Vector3<f32>,
    pub thrust: f32,
    /// Time step (in milliseconds) the command was computed with.
    pub update_time_ms: f32,
}

/// Rate setpoints (in degrees/second) of the last cycle, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateDesired {
    pub rate: Vector3<f32>,
}

/// Per-axis state carried between cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisState {
    /// Mode of the previous cycle, `None` forces the next cycle to reinitialize.
    pub previous_mode: Option<StabilizationMode>,
    /// Angle (in degrees) held by AxisLock.
    pub lock_accumulator: f32,
}

/// What happened during one [`Stabilizer::step`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CycleReport {
    /// The actuator command was published.
    pub published: bool,
    /// An axis carried a mode tag outside the known control laws.
    pub unrecognized: Option<(Axis, StabilizationMode)>,
    /// Every axis will reinitialize on the next cycle.
    pub reinit_forced: bool,
}

impl CycleReport {
    pub fn fault(&self) -> bool {
        self.unrecognized.is_some()
    }
}

pub struct Stabilizer<V = (), R = ()> {
    pub(crate) settings: StabilizationSettings,
    pub(crate) coefficients: Coefficients,
    pub(crate) settings_banks: [StabilizationBank; SETTINGS_BANKS],
    pub(crate) bank: StabilizationBank,
    pub(crate) pids: PidBank,
    pub(crate) axes: PerAxis<AxisState>,
    pub(crate) selected_position: Option<u8>,
    pub(crate) gyro_filter: PerAxis<LowPassFilter<f32>>,
    pub(crate) cruise: CruiseControl,
    /// Axis commands of the last published cycle, before cruise control.
    pub(crate) command: Vector3<f32>,
    pub(crate) actuator: ActuatorDesired,
    pub(crate) rate_desired: RateDesired,
    pub(crate) flybar: V,
    pub(crate) relay: R,
}

impl Stabilizer {
    /// Create a stabilizer without virtual flybar or relay tuning support.
    pub fn new(
        settings: StabilizationSettings,
        banks: [StabilizationBank; SETTINGS_BANKS],
    ) -> Self {
        Self::with_collaborators(settings, banks, (), ())
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new(StabilizationSettings::default(), Default::default())
    }
}

impl<V, R> Stabilizer<V, R> {
    pub fn with_collaborators(
        settings: StabilizationSettings,
        banks: [StabilizationBank; SETTINGS_BANKS],
        flybar: V,
        relay: R,
    ) -> Self {
        let mut me = Self {
            settings: StabilizationSettings::default(),
            coefficients: Coefficients::default(),
            bank: banks[0].clone(),
            settings_banks: banks,
            pids: PidBank::default(),
            axes: PerAxis::default(),
            selected_position: None,
            gyro_filter: PerAxis::default(),
            cruise: CruiseControl::default(),
            command: Vector3::zeros(),
            actuator: ActuatorDesired::default(),
            rate_desired: RateDesired::default(),
            flybar,
            relay,
        };
        me.on_settings_updated(settings);
        me.on_bank_updated(me.bank.clone());
        me.zero();
        me
    }

    pub fn settings(&self) -> &StabilizationSettings {
        &self.settings
    }

    pub fn coefficients(&self) -> Coefficients {
        self.coefficients
    }

    /// The bank the control laws currently read.
    pub fn bank(&self) -> &StabilizationBank {
        &self.bank
    }

    pub fn pid(&self, role: PidRole, axis: Axis) -> &Pid {
        &self.pids[(role, axis)]
    }

    pub fn axis_state(&self, axis: Axis) -> &AxisState {
        &self.axes[axis]
    }

    /// The flight mode switch position the active bank was selected for.
    pub fn selected_position(&self) -> Option<u8> {
        self.selected_position
    }

    /// The last published actuator command.
    pub fn actuator_desired(&self) -> &ActuatorDesired {
        &self.actuator
    }

    pub fn rate_desired(&self) -> &RateDesired {
        &self.rate_desired
    }

    pub fn flybar(&self) -> &V {
        &self.flybar
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Clear every controller and the AxisLock accumulators.
    pub fn zero(&mut self) {
        self.pids.zero();
        for (_, state) in self.axes.iter_mut() {
            state.lock_accumulator = 0.;
        }
    }

    /// Make every axis reinitialize on the next cycle, whatever its mode.
    pub fn force_reinit(&mut self) {
        for (_, state) in self.axes.iter_mut() {
            state.previous_mode = None;
        }
    }
}

impl<V, R> Stabilizer<V, R>
where
    V: VirtualFlybar,
    R: RelayTuner,
{
    /// Run one control cycle with the time step `dt` (in seconds).
    pub fn step(&mut self, inputs: &ControlInputs, gyro: &GyroState, dt: f32) -> CycleReport {
        let position = inputs.manual.flight_mode_switch_position;
        if self.selected_position != Some(position) {
            self.select_flight_mode(position);
        }

        let desired = &inputs.desired;
        let scale = self.settings.airspeed_scaling.factor(inputs.airspeed);
        let error = self.attitude_error(desired, &inputs.attitude);

        let filters = &mut self.gyro_filter;
        let gyro_filtered =
            PerAxis::from_fn(|axis| filters[axis].apply(gyro.rate[axis.index()]));

        // Square stick region: holding roll and adding pitch doesn't change the blend
        let magnitude = desired.target.x.abs().max(desired.target.y.abs()).min(1.);

        // Axes with an unrecognized mode keep their last published command
        let mut command = self.command;
        let mut rate = self.rate_desired.rate;
        let mut report = CycleReport::default();

        for axis in Axis::ALL {
            let i = axis.index();
            let mode = desired.modes[axis];

            let state = &mut self.axes[axis];
            let reinit = state.previous_mode != Some(mode);
            state.previous_mode = Some(mode);

            let input = AxisInput {
                axis,
                mode,
                reinit,
                stick: desired.target[i],
                attitude: inputs.attitude.euler[i],
                error: error[axis],
                gyro: gyro_filtered[axis],
                magnitude,
                scale,
                dt,
            };
            if !self.run_axis(&input, &mut command[i], &mut rate[i])
                && report.unrecognized.is_none()
            {
                report.unrecognized = Some((axis, mode));
            }
        }

        if self.settings.virtual_bar.piro_comp {
            self.flybar.pirouette_compensation(gyro_filtered[Axis::Yaw], dt);
        }

        self.rate_desired.rate = rate;

        let mut actuator = ActuatorDesired {
            command,
            thrust: desired.thrust,
            update_time_ms: dt * 1000.,
        };
        self.cruise.apply(
            &self.settings.cruise_control,
            position,
            &inputs.attitude.euler,
            &mut actuator,
        );

        if inputs.flight_status.stabilization_enabled {
            self.command = command;
            self.actuator = actuator;
            report.published = true;
        } else {
            // Restart cleanly when the stabilization stage is engaged again
            self.force_reinit();
            report.reinit_forced = true;
        }

        if !inputs.flight_status.armed
            || (self.settings.low_throttle_zero_integral && inputs.manual.throttle < 0.)
        {
            self.force_reinit();
            report.reinit_forced = true;
        }

        report
    }

    /// Angle error (in degrees) per axis between the desired and the measured attitude.
    fn attitude_error(
        &self,
        desired: &StabilizationDesired,
        attitude: &AttitudeState,
    ) -> PerAxis<f32> {
        if self.settings.quaternion_error {
            // Only axes in Attitude mode have a desired angle, the rest hold the measurement
            let rpy_desired = Vector3::from_fn(|i, _| {
                if desired.modes[Axis::ALL[i]] == StabilizationMode::Attitude {
                    desired.target[i]
                } else {
                    attitude.euler[i]
                }
            });
            let q_error = attitude.quaternion().inverse() * euler_to_quaternion(&rpy_desired);
            let (roll, pitch, yaw) = q_error.euler_angles();
            PerAxis::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
        } else {
            let error = desired.target - attitude.euler;
            PerAxis::new(error.x, error.y, wrap_degrees(error.z))
        }
    }
}

/// Wrap an angle (in degrees) into the shortest path in [-180, 180).
pub fn wrap_degrees(angle: f32) -> f32 {
    let modulo = (angle + 180.) % 360.;
    if modulo < 0. {
        modulo + 180.
    } else {
        modulo - 180.
    }
}

fn euler_to_quaternion(rpy: &Vector3<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(
        rpy.x.to_radians(),
        rpy.y.to_radians(),
        rpy.z.to_radians(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::PidGains;
    use crate::settings::{CruiseControlSettings, FLIGHT_MODE_POSITIONS};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn armed(modes: PerAxis<StabilizationMode>, target: Vector3<f32>) -> ControlInputs {
        ControlInputs {
            desired: StabilizationDesired {
                target,
                thrust: 0.5,
                modes,
            },
            flight_status: FlightStatus {
                armed: true,
                stabilization_enabled: true,
            },
            manual: ManualControl {
                throttle: 0.5,
                flight_mode_switch_position: 0,
            },
            ..Default::default()
        }
    }

    fn integrating_bank() -> StabilizationBank {
        StabilizationBank {
            rate_pid: PerAxis::splat(PidGains::new(0.003, 0.5, 0., 0.3)),
            attitude_pi: PerAxis::splat(PidGains::pi(2.5, 0.5, 50.)),
            ..Default::default()
        }
    }

    fn stabilizer() -> Stabilizer {
        let bank = integrating_bank();
        Stabilizer::new(
            StabilizationSettings::default(),
            [bank.clone(), bank.clone(), bank],
        )
    }

    #[test]
    fn yaw_error_takes_shortest_path() {
        assert_abs_diff_eq!(wrap_degrees(190. - -170.), 0., epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_degrees(350.), -10., epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_degrees(-350.), 10., epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_degrees(45.), 45., epsilon = 1e-4);

        let stabilizer = stabilizer();
        let desired = StabilizationDesired {
            target: Vector3::new(0., 0., 190.),
            ..Default::default()
        };
        let error = stabilizer.attitude_error(&desired, &AttitudeState::from_euler(0., 0., -170.));
        assert!(error[Axis::Yaw].abs() <= 180.);
        assert_abs_diff_eq!(error[Axis::Yaw], 0., epsilon = 1e-4);
    }

    #[test]
    fn quaternion_error_matches_euler_for_single_axis() {
        let mut stabilizer = stabilizer();
        stabilizer.on_settings_updated(StabilizationSettings {
            quaternion_error: true,
            ..Default::default()
        });

        let desired = StabilizationDesired {
            target: Vector3::new(10., 0., 0.),
            thrust: 0.,
            modes: PerAxis::new(
                StabilizationMode::Attitude,
                StabilizationMode::Rate,
                StabilizationMode::Rate,
            ),
        };
        let error = stabilizer.attitude_error(&desired, &AttitudeState::from_euler(4., 0., 0.));

        assert_relative_eq!(error[Axis::Roll], 6., epsilon = 1e-3);
        assert_abs_diff_eq!(error[Axis::Pitch], 0., epsilon = 1e-3);
        assert_abs_diff_eq!(error[Axis::Yaw], 0., epsilon = 1e-3);
    }

    #[test]
    fn actuator_always_in_range() {
        let modes = [
            StabilizationMode::None,
            StabilizationMode::Rate,
            StabilizationMode::Attitude,
            StabilizationMode::AxisLock,
            StabilizationMode::WeakLeveling,
            StabilizationMode::VirtualBar,
            StabilizationMode::Rattitude,
            StabilizationMode::RelayRate,
            StabilizationMode::RelayAttitude,
        ];
        let mut bank = integrating_bank();
        bank.rate_pid = PerAxis::splat(PidGains::new(5., 5., 0., 100.));

        for mode in modes {
            let mut stabilizer = Stabilizer::new(
                StabilizationSettings::default(),
                [bank.clone(), bank.clone(), bank.clone()],
            );
            let inputs = armed(PerAxis::splat(mode), Vector3::new(0.9, -0.9, 5.));
            let gyro = GyroState::new(-400., 400., 90.);

            for _ in 0..5 {
                stabilizer.step(&inputs, &gyro, 0.01);
                let command = stabilizer.actuator_desired().command;
                for c in command.iter() {
                    assert!((-1. ..=1.).contains(c), "{:?} produced {}", mode, c);
                }
            }
        }
    }

    #[test]
    fn mode_change_resets_integrals() {
        let mut stabilizer = stabilizer();
        let gyro = GyroState::default();
        let attitude_mode = armed(
            PerAxis::splat(StabilizationMode::Attitude),
            Vector3::new(10., 10., 10.),
        );

        for _ in 0..10 {
            stabilizer.step(&attitude_mode, &gyro, 0.01);
        }
        assert!(stabilizer.pid(PidRole::Attitude, Axis::Roll).integrator() > 0.);
        assert!(stabilizer.pid(PidRole::Rate, Axis::Roll).integrator() > 0.);

        // Rate mode with no error: nothing accumulates in the reinit cycle
        let rate_mode = armed(PerAxis::splat(StabilizationMode::Rate), Vector3::zeros());
        stabilizer.step(&rate_mode, &gyro, 0.01);
        for axis in Axis::ALL {
            let integrator = stabilizer.pid(PidRole::Rate, axis).integrator();
            assert_abs_diff_eq!(integrator, 0., epsilon = 1e-6);
        }
    }

    #[test]
    fn unrecognized_mode_freezes_axis() {
        let mut stabilizer = stabilizer();
        let gyro = GyroState::default();

        let none = armed(
            PerAxis::splat(StabilizationMode::None),
            Vector3::new(0.25, 0.5, 0.75),
        );
        assert!(!stabilizer.step(&none, &gyro, 0.01).fault());

        let mut broken = none;
        broken.desired.modes[Axis::Pitch] = StabilizationMode::Unrecognized(42);
        broken.desired.target = Vector3::new(-0.25, -0.5, -0.75);
        let report = stabilizer.step(&broken, &gyro, 0.01);

        assert_eq!(
            report.unrecognized,
            Some((Axis::Pitch, StabilizationMode::Unrecognized(42)))
        );
        let command = stabilizer.actuator_desired().command;
        assert_eq!(command, Vector3::new(-0.25, 0.5, -0.75));

        // The fault clears with the next clean cycle
        assert!(!stabilizer.step(&none, &gyro, 0.01).fault());
    }

    #[test]
    fn unrecognized_axis_holds_under_inverted_cruise() {
        let mut stabilizer = stabilizer();
        stabilizer.on_settings_updated(StabilizationSettings {
            cruise_control: CruiseControlSettings {
                max_angle: 180,
                inverted_power_switch: -1,
                flight_mode_switch_pos_enable: [true; FLIGHT_MODE_POSITIONS],
                ..Default::default()
            },
            ..Default::default()
        });
        let gyro = GyroState::default();

        let mut none = armed(
            PerAxis::splat(StabilizationMode::None),
            Vector3::new(0.1, 0.4, 0.2),
        );
        none.attitude = AttitudeState::from_euler(150., 0., 0.);
        stabilizer.step(&none, &gyro, 0.01);
        assert!(stabilizer.cruise.factor() < 0.);
        assert_relative_eq!(stabilizer.actuator_desired().command.y, -0.4);

        let mut broken = none;
        broken.desired.modes[Axis::Pitch] = StabilizationMode::Unrecognized(42);
        broken.desired.target = Vector3::new(0.3, -0.9, 0.6);
        for _ in 0..4 {
            assert!(stabilizer.step(&broken, &gyro, 0.01).fault());
            let command = stabilizer.actuator_desired().command;
            assert_relative_eq!(command.x, 0.3);
            assert_relative_eq!(command.y, -0.4);
            assert_relative_eq!(command.z, -0.6);
        }
    }

    #[test]
    fn cruise_control_follows_switch_position() {
        let mut enable = [false; FLIGHT_MODE_POSITIONS];
        enable[1] = true;
        let mut stabilizer = stabilizer();
        stabilizer.on_settings_updated(StabilizationSettings {
            cruise_control: CruiseControlSettings {
                flight_mode_switch_pos_enable: enable,
                ..Default::default()
            },
            ..Default::default()
        });
        let gyro = GyroState::default();

        let mut inputs = armed(PerAxis::splat(StabilizationMode::None), Vector3::zeros());
        inputs.attitude = AttitudeState::from_euler(60., 0., 0.);
        inputs.desired.thrust = 0.4;
        stabilizer.step(&inputs, &gyro, 0.01);
        assert_relative_eq!(stabilizer.actuator_desired().thrust, 0.4);

        inputs.manual.flight_mode_switch_position = 1;
        stabilizer.step(&inputs, &gyro, 0.01);
        assert_relative_eq!(stabilizer.actuator_desired().thrust, 0.8, epsilon = 1e-4);

        // At or below min thrust the motors are left alone
        inputs.desired.thrust = 0.05;
        stabilizer.step(&inputs, &gyro, 0.01);
        assert_relative_eq!(stabilizer.actuator_desired().thrust, 0.05);
    }

    #[test]
    fn disarm_forces_reinit() {
        let mut stabilizer = stabilizer();
        let gyro = GyroState::default();
        let inputs = armed(PerAxis::splat(StabilizationMode::Rate), Vector3::zeros());

        stabilizer.step(&inputs, &gyro, 0.01);
        assert_eq!(
            stabilizer.axis_state(Axis::Roll).previous_mode,
            Some(StabilizationMode::Rate)
        );

        let mut disarmed = inputs;
        disarmed.flight_status.armed = false;
        let report = stabilizer.step(&disarmed, &gyro, 0.01);
        assert!(report.reinit_forced);
        for axis in Axis::ALL {
            assert_eq!(stabilizer.axis_state(axis).previous_mode, None);
        }

        // Re-arming in the same mode still reinitializes: the accumulated error is dropped
        let mut rate_error = inputs;
        rate_error.desired.target = Vector3::new(100., 0., 0.);
        stabilizer.step(&rate_error, &gyro, 0.01);
        stabilizer.step(&rate_error, &gyro, 0.01);
        assert!(stabilizer.pid(PidRole::Rate, Axis::Roll).integrator() > 0.);
        stabilizer.step(&disarmed, &gyro, 0.01);
        stabilizer.step(&inputs, &gyro, 0.01);
        let integrator = stabilizer.pid(PidRole::Rate, Axis::Roll).integrator();
        assert_abs_diff_eq!(integrator, 0., epsilon = 1e-6);
    }

    #[test]
    fn low_throttle_forces_reinit() {
        let mut stabilizer = stabilizer();
        let mut inputs = armed(PerAxis::splat(StabilizationMode::Rate), Vector3::zeros());
        inputs.manual.throttle = -0.5;

        let report = stabilizer.step(&inputs, &GyroState::default(), 0.01);
        assert!(report.published);
        assert!(report.reinit_forced);
    }

    #[test]
    fn disabled_chain_does_not_publish() {
        let mut stabilizer = stabilizer();
        let mut inputs = armed(
            PerAxis::splat(StabilizationMode::None),
            Vector3::new(0.5, 0.5, 0.5),
        );
        inputs.flight_status.stabilization_enabled = false;

        let report = stabilizer.step(&inputs, &GyroState::default(), 0.01);
        assert!(!report.published);
        assert!(report.reinit_forced);
        assert_eq!(*stabilizer.actuator_desired(), ActuatorDesired::default());
    }

    #[test]
    fn actuator_reports_time_step_and_thrust() {
        let mut stabilizer = stabilizer();
        let inputs = armed(PerAxis::splat(StabilizationMode::None), Vector3::zeros());

        stabilizer.step(&inputs, &GyroState::default(), 0.0015);
        let actuator = stabilizer.actuator_desired();
        assert_relative_eq!(actuator.update_time_ms, 1.5);
        assert_relative_eq!(actuator.thrust, 0.5);
    }

    #[test]
    fn gyro_is_low_pass_filtered() {
        let mut stabilizer = stabilizer();
        let alpha = stabilizer.coefficients().gyro_alpha;
        assert!(alpha > 0. && alpha < 1.);

        let inputs = armed(PerAxis::splat(StabilizationMode::Rate), Vector3::zeros());
        stabilizer.step(&inputs, &GyroState::new(100., 0., 0.), 0.01);

        assert_relative_eq!(
            stabilizer.gyro_filter[Axis::Roll].output(),
            100. * (1. - alpha),
            epsilon = 1e-4
        );
    }
}
