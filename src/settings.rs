//! Tuning records delivered by the ground station.
//!
//! Angles are in degrees, rates in degrees/second and thrust values in percent,
//! matching the records the ground station edits.

use crate::axis::PerAxis;
use crate::pid::PidGains;
use crate::Error;

/// Number of positions on the flight mode switch.
pub const FLIGHT_MODE_POSITIONS: usize = 6;

/// Number of settings banks a switch position can select.
pub const SETTINGS_BANKS: usize = 3;

/// One of the three underlying settings banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BankId {
    Bank1,
    Bank2,
    Bank3,
}

impl BankId {
    pub const fn index(self) -> usize {
        match self {
            BankId::Bank1 => 0,
            BankId::Bank2 => 1,
            BankId::Bank3 => 2,
        }
    }
}

impl TryFrom<u8> for BankId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BankId::Bank1),
            1 => Ok(BankId::Bank2),
            2 => Ok(BankId::Bank3),
            other => Err(Error::InvalidBank(other)),
        }
    }
}

/// Per-axis gains and limits, selected by the flight mode switch.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationBank {
    /// Inner loop gains.
    pub rate_pid: PerAxis<PidGains>,

    /// Outer loop gains, the derivative gain is ignored.
    pub attitude_pi: PerAxis<PidGains>,

    /// Largest rate the stick can command in Rate-like modes.
    pub manual_rate: PerAxis<f32>,

    /// Largest rate the attitude loop may command.
    pub maximum_rate: PerAxis<f32>,

    /// Angle at full stick in Rattitude mode.
    pub max_angle: PerAxis<f32>,
}

impl Default for StabilizationBank {
    fn default() -> Self {
        Self {
            rate_pid: PerAxis::new(
                PidGains::new(0.003, 0.0065, 0.000033, 0.3),
                PidGains::new(0.003, 0.0065, 0.000033, 0.3),
                PidGains::new(0.0035, 0.0035, 0., 0.3),
            ),
            attitude_pi: PerAxis::splat(PidGains::pi(2.5, 0., 50.)),
            manual_rate: PerAxis::new(220., 220., 220.),
            maximum_rate: PerAxis::new(300., 300., 300.),
            max_angle: PerAxis::new(42., 42., 42.),
        }
    }
}

/// Virtual flybar tuning, consumed by the [`VirtualFlybar`](crate::VirtualFlybar) collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualBarSettings {
    /// Decay time constant (in seconds) of the virtual flybar angle.
    pub tau: f32,
    pub sensitivity: PerAxis<f32>,
    pub pi: PerAxis<PidGains>,
    /// Percentage of gyro feedback suppressed at full stick.
    pub gyro_suppress: u8,
    /// Largest virtual flybar angle (in degrees).
    pub max_angle: f32,
    /// Run pirouette compensation after every cycle.
    pub piro_comp: bool,
}

impl Default for VirtualBarSettings {
    fn default() -> Self {
        Self {
            tau: 0.5,
            sensitivity: PerAxis::splat(0.5),
            pi: PerAxis::new(
                PidGains::pi(0.005, 0.002, 0.),
                PidGains::pi(0.005, 0.002, 0.),
                PidGains::pi(0.005, 0.002, 0.),
            ),
            gyro_suppress: 30,
            max_angle: 10.,
            piro_comp: false,
        }
    }
}

/// Tilt compensation of the thrust command.
#[derive(Clone, Debug, PartialEq)]
pub struct CruiseControlSettings {
    /// Thrust (in percent) at or below which no compensation is applied.
    pub min_thrust: u8,
    /// Largest compensated thrust (in percent).
    pub max_thrust: u8,
    /// Tilt (in degrees) beyond which `inverted_power_switch` is used as the factor.
    pub max_angle: u8,
    /// Largest boost factor.
    pub max_power_factor: f32,
    /// Percentage of the boost actually applied.
    pub power_trim: f32,
    /// Factor past `max_angle`: -1 reverses the collective, 0 cuts power, 1 keeps it.
    pub inverted_power_switch: i8,
    /// Thrust (in percent) that produces no lift, e.g. 50 for collective pitch helicopters.
    pub neutral_thrust: u8,
    /// Enable per flight mode switch position.
    pub flight_mode_switch_pos_enable: [bool; FLIGHT_MODE_POSITIONS],
}

impl Default for CruiseControlSettings {
    fn default() -> Self {
        Self {
            min_thrust: 5,
            max_thrust: 90,
            max_angle: 105,
            max_power_factor: 3.,
            power_trim: 100.,
            inverted_power_switch: 0,
            neutral_thrust: 0,
            flight_mode_switch_pos_enable: [false; FLIGHT_MODE_POSITIONS],
        }
    }
}

/// Scaling of the rate loops with airspeed, for fixed wing aircraft.
#[derive(Clone, Debug, PartialEq)]
pub struct AirspeedScaling {
    /// Airspeed (in m/s) at which the gains apply unscaled, below 0.1 disables scaling.
    pub scale_to_airspeed: f32,
    pub min: f32,
    pub max: f32,
}

impl Default for AirspeedScaling {
    fn default() -> Self {
        Self {
            scale_to_airspeed: 0.,
            min: 0.05,
            max: 3.,
        }
    }
}

impl AirspeedScaling {
    /// Factor applied to the rate loops at the given calibrated airspeed (in m/s).
    pub fn factor(&self, airspeed: Option<f32>) -> f32 {
        match airspeed {
            Some(airspeed) if self.scale_to_airspeed >= 0.1 && airspeed >= 0.1 => {
                // 1.0 at the reference speed, scaled by 1/speed^2
                (self.scale_to_airspeed * self.scale_to_airspeed / (airspeed * airspeed))
                    .max(self.min)
                    .min(self.max)
            }
            _ => 1.,
        }
    }
}

/// Global stabilization settings.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationSettings {
    /// Gyro low-pass time constant (in seconds).
    pub gyro_tau: f32,
    /// Derivative low-pass cutoff (in hz), zero or below disables the derivative term.
    pub derivative_cutoff: f32,
    /// Setpoint weight of the rate loop derivative.
    pub derivative_gamma: f32,
    /// Largest accumulated angle (in degrees) held by AxisLock.
    pub max_axis_lock: f32,
    /// Stick rate (in degrees/second) above which AxisLock behaves like Rate.
    pub max_axis_lock_rate: f32,
    pub weak_leveling_kp: f32,
    /// Largest leveling rate (in degrees/second) added by WeakLeveling.
    pub max_weak_leveling_rate: f32,
    /// Reinitialize the controllers whenever the throttle is below zero.
    pub low_throttle_zero_integral: bool,
    /// Rattitude anti-windup strength, 0 (off) to 31.
    pub rattitude_anti_windup: u8,
    /// Compute the attitude error from quaternions instead of Euler differences.
    pub quaternion_error: bool,
    /// Settings bank selected by each flight mode switch position.
    pub flight_mode_map: [u8; FLIGHT_MODE_POSITIONS],
    pub virtual_bar: VirtualBarSettings,
    pub cruise_control: CruiseControlSettings,
    pub airspeed_scaling: AirspeedScaling,
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self {
            gyro_tau: 0.005,
            derivative_cutoff: 20.,
            derivative_gamma: 0.,
            max_axis_lock: 30.,
            max_axis_lock_rate: 2.,
            weak_leveling_kp: 0.1,
            max_weak_leveling_rate: 5.,
            low_throttle_zero_integral: true,
            rattitude_anti_windup: 10,
            quaternion_error: false,
            flight_mode_map: [0, 0, 1, 1, 2, 2],
            virtual_bar: VirtualBarSettings::default(),
            cruise_control: CruiseControlSettings::default(),
            airspeed_scaling: AirspeedScaling::default(),
        }
    }
}

impl StabilizationSettings {
    /// The settings bank selected by a flight mode switch position.
    pub fn bank_for_position(&self, position: u8) -> Result<BankId, Error> {
        let entry = self
            .flight_mode_map
            .get(position as usize)
            .ok_or(Error::InvalidSwitchPosition(position))?;
        BankId::try_from(*entry)
    }
}
