//! # embedded-flight-stabilization
//! Attitude and rate stabilization for flight controllers
//!
//! # Control loop
//! [`Stabilizer`] turns the desired attitude or rates into actuator commands,
//! one [`step`](Stabilizer::step) per gyro sample.
//! Each axis runs the control law picked by its [`StabilizationMode`] (see [`control_law`]).
//!
//! [`StabilizationTask`] drives a [`Stabilizer`] from tokio channels with a failsafe timeout.
//!
//! # Tuning
//! [`StabilizationSettings`] holds the global settings and
//! [`StabilizationBank`] the per-axis gains selected by the flight mode switch.
//! Both can be replaced while flying (see [`reconcile`]).
//!
//! # Helicopter support
//! [`VirtualFlybar`] and [`RelayTuner`] plug in the virtual flybar and relay
//! tuning algorithms.

pub mod axis;
pub use axis::{Axis, PerAxis};

pub mod collaborator;
pub use collaborator::{FlybarInput, RelayTuner, VirtualFlybar};

pub mod control_law;

pub mod cruise;
pub use cruise::CruiseControl;

mod error;
pub use error::Error;

pub mod filter;

pub mod mode;
pub use mode::StabilizationMode;

pub mod pid;
pub use pid::{Pid, PidGains, PidRole};

pub mod reconcile;

pub mod settings;
pub use settings::{BankId, StabilizationBank, StabilizationSettings};

pub mod stabilizer;
pub use stabilizer::{
    ActuatorDesired, AttitudeState, ControlInputs, CycleReport, FlightStatus, GyroState,
    ManualControl, RateDesired, StabilizationDesired, Stabilizer,
};

pub mod task;
pub use task::{AlarmState, Notification, StabilizationHandle, StabilizationTask};

pub mod timing;
pub use timing::{DeltaTime, SystemClock};

use num_traits::Float;

/// Clamp `val` to `[-range, range]`.
pub fn bound<T: Float>(val: T, range: T) -> T {
    val.max(-range).min(range)
}
