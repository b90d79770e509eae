//! Thrust compensation for tilt.
//!
//! Tilting the aircraft points part of the thrust sideways. Cruise control
//! scales the thrust command by `1 / cos(tilt)` so altitude holds through turns.

use crate::settings::CruiseControlSettings;
use crate::stabilizer::ActuatorDesired;
use nalgebra::Vector3;

/// The tilt factor is recomputed on every cycle that is a multiple of this.
const EVALUATION_INTERVAL: u8 = 8;

/// Max power factors at or below this disable cruise control.
const MIN_POWER_FACTOR: f32 = 0.0001;

/// Half width (in degrees) of the band around 90 degrees where `1 / cos` is replaced
/// by the max factor.
const SINGULARITY_BAND: f32 = 0.001;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CruiseControl {
    counter: u8,
    factor: f32,
}

impl Default for CruiseControl {
    fn default() -> Self {
        Self {
            counter: 0,
            factor: 1.,
        }
    }
}

impl CruiseControl {
    /// The factor applied on the last active cycle.
    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Compensate `actuator.thrust` for the tilt of `attitude` (roll, pitch and yaw in degrees).
    pub fn apply(
        &mut self,
        settings: &CruiseControlSettings,
        flight_mode_position: u8,
        attitude: &Vector3<f32>,
        actuator: &mut ActuatorDesired,
    ) {
        let enabled = settings
            .flight_mode_switch_pos_enable
            .get(flight_mode_position as usize)
            .copied()
            .unwrap_or(false);
        if !enabled || settings.max_power_factor <= MIN_POWER_FACTOR {
            return;
        }

        if self.counter % EVALUATION_INTERVAL == 0 {
            self.factor = tilt_factor(settings, tilt_angle(attitude.x, attitude.y));
        }
        self.counter = self.counter.wrapping_add(1);

        // Upside down with reversed collective: pitch and yaw act reversed too
        if self.factor < 0. {
            actuator.command.y = -actuator.command.y;
            actuator.command.z = -actuator.command.z;
        }

        let min_thrust = f32::from(settings.min_thrust) / 100.;
        let max_thrust = f32::from(settings.max_thrust) / 100.;
        let neutral_thrust = f32::from(settings.neutral_thrust) / 100.;

        // Motors-off and negative collective commands are left alone
        if actuator.thrust > min_thrust {
            actuator.thrust = ((actuator.thrust - neutral_thrust) * self.factor + neutral_thrust)
                .min(max_thrust)
                .max(min_thrust);
        }
    }
}

/// Angle (in degrees) between the body and earth vertical axes.
pub fn tilt_angle(roll: f32, pitch: f32) -> f32 {
    let cos_tilt = roll.to_radians().cos() * pitch.to_radians().cos();
    cos_tilt.max(-1.).min(1.).acos().to_degrees()
}

/// Thrust factor at a tilt `angle` (in degrees).
pub fn tilt_factor(settings: &CruiseControlSettings, angle: f32) -> f32 {
    if angle > f32::from(settings.max_angle) {
        return f32::from(settings.inverted_power_switch);
    }

    let factor = if (angle - 90.).abs() < SINGULARITY_BAND {
        settings.max_power_factor
    } else {
        (1. / angle.to_radians().cos().abs()).min(settings.max_power_factor)
    };
    let factor = (factor - 1.) * settings.power_trim / 100. + 1.;

    if angle > 90. && settings.inverted_power_switch == -1 {
        -factor
    } else {
        factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FLIGHT_MODE_POSITIONS;
    use approx::assert_relative_eq;

    fn settings() -> CruiseControlSettings {
        CruiseControlSettings {
            flight_mode_switch_pos_enable: [true; FLIGHT_MODE_POSITIONS],
            ..Default::default()
        }
    }

    fn actuator(thrust: f32) -> ActuatorDesired {
        ActuatorDesired {
            command: Vector3::new(0.1, 0.2, 0.3),
            thrust,
            update_time_ms: 0.,
        }
    }

    #[test]
    fn level_flight_is_uncompensated() {
        assert_relative_eq!(tilt_angle(0., 0.), 0.);
        assert_relative_eq!(tilt_factor(&settings(), 0.), 1.);
    }

    #[test]
    fn ninety_degrees_uses_max_factor() {
        assert_relative_eq!(tilt_angle(90., 0.), 90., epsilon = 1e-3);
        assert_relative_eq!(tilt_factor(&settings(), 90.), 3.);

        let factor = tilt_factor(&settings(), tilt_angle(0., 90.));
        assert!(factor.is_finite());
        assert!(factor <= 3.);
    }

    #[test]
    fn factor_follows_inverse_cosine() {
        assert_relative_eq!(tilt_factor(&settings(), 60.), 2., epsilon = 1e-5);

        let half_trim = CruiseControlSettings {
            power_trim: 50.,
            ..settings()
        };
        assert_relative_eq!(tilt_factor(&half_trim, 60.), 1.5, epsilon = 1e-5);
    }

    #[test]
    fn beyond_max_angle_uses_inverted_switch() {
        let cut = CruiseControlSettings {
            inverted_power_switch: 0,
            ..settings()
        };
        assert_eq!(tilt_factor(&cut, 120.), 0.);

        let reversed = CruiseControlSettings {
            inverted_power_switch: -1,
            max_angle: 180,
            ..settings()
        };
        assert_relative_eq!(tilt_factor(&reversed, 120.), -2., epsilon = 1e-5);
    }

    #[test]
    fn thrust_compensated_and_clamped() {
        let mut cruise = CruiseControl::default();
        let mut out = actuator(0.4);
        cruise.apply(&settings(), 0, &Vector3::new(60., 0., 0.), &mut out);
        assert_relative_eq!(out.thrust, 0.8, epsilon = 1e-5);

        let mut cruise = CruiseControl::default();
        let mut out = actuator(0.6);
        cruise.apply(&settings(), 0, &Vector3::new(60., 0., 0.), &mut out);
        assert_relative_eq!(out.thrust, 0.9, epsilon = 1e-5);
    }

    #[test]
    fn low_thrust_untouched() {
        let mut cruise = CruiseControl::default();
        let mut out = actuator(0.05);
        cruise.apply(&settings(), 0, &Vector3::new(60., 0., 0.), &mut out);
        assert_eq!(out.thrust, 0.05);
    }

    #[test]
    fn disabled_position_untouched() {
        let mut settings = settings();
        settings.flight_mode_switch_pos_enable[2] = false;

        let mut cruise = CruiseControl::default();
        let mut out = actuator(0.4);
        cruise.apply(&settings, 2, &Vector3::new(60., 0., 0.), &mut out);
        assert_eq!(out.thrust, 0.4);

        // Out of range positions are never enabled
        cruise.apply(&settings, 7, &Vector3::new(60., 0., 0.), &mut out);
        assert_eq!(out.thrust, 0.4);
    }

    #[test]
    fn factor_reevaluated_every_eighth_cycle() {
        let mut cruise = CruiseControl::default();
        cruise.apply(&settings(), 0, &Vector3::new(60., 0., 0.), &mut actuator(0.4));
        assert_relative_eq!(cruise.factor(), 2., epsilon = 1e-5);

        for _ in 1..8 {
            cruise.apply(&settings(), 0, &Vector3::zeros(), &mut actuator(0.4));
            assert_relative_eq!(cruise.factor(), 2., epsilon = 1e-5);
        }

        cruise.apply(&settings(), 0, &Vector3::zeros(), &mut actuator(0.4));
        assert_relative_eq!(cruise.factor(), 1.);
    }

    #[test]
    fn reversed_power_flips_pitch_and_yaw() {
        let settings = CruiseControlSettings {
            inverted_power_switch: -1,
            max_angle: 180,
            neutral_thrust: 50,
            min_thrust: 0,
            max_thrust: 100,
            ..settings()
        };
        let mut cruise = CruiseControl::default();
        let mut out = actuator(0.6);
        cruise.apply(&settings, 0, &Vector3::new(150., 0., 0.), &mut out);

        assert!(cruise.factor() < 0.);
        assert_eq!(out.command, Vector3::new(0.1, -0.2, -0.3));
        assert!(out.thrust < 0.5);
    }
}
