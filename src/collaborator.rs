use crate::axis::Axis;
use crate::settings::VirtualBarSettings;

/// Inputs of one virtual flybar step on one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlybarInput {
    pub axis: Axis,
    /// Filtered gyro rate (in degrees/second).
    pub gyro: f32,
    /// Stick command.
    pub command: f32,
    pub dt: f32,
    /// The axis just entered VirtualBar mode and any flybar state should restart.
    pub reinit: bool,
    /// Per-step decay of the virtual flybar angle, derived from [`VirtualBarSettings::tau`].
    pub decay: f32,
}

/// Virtual flybar stabilization for flybarless helicopters.
pub trait VirtualFlybar {
    /// Run one step and write the axis command to `actuator`.
    fn stabilize(&mut self, input: &FlybarInput, settings: &VirtualBarSettings, actuator: &mut f32);

    /// Rotate the flybar state by the yaw rate (in degrees/second) so it stays
    /// fixed in space during pirouettes.
    fn pirouette_compensation(&mut self, _yaw_gyro: f32, _dt: f32) {}
}

/// Relay auto-tuner that self-oscillates the rate loop to estimate plant gain and period.
pub trait RelayTuner {
    /// Run one relay step on the rate `error` (in degrees/second) and write the axis command
    /// to `actuator`.
    fn relay_rate(&mut self, axis: Axis, error: f32, actuator: &mut f32, reinit: bool);
}

/// No flybar attached: the axis is held at a neutral command.
impl VirtualFlybar for () {
    fn stabilize(
        &mut self,
        _input: &FlybarInput,
        _settings: &VirtualBarSettings,
        actuator: &mut f32,
    ) {
        *actuator = 0.;
    }
}

/// No relay tuner attached: the axis is held at a neutral command.
impl RelayTuner for () {
    fn relay_rate(&mut self, _axis: Axis, _error: f32, actuator: &mut f32, _reinit: bool) {
        *actuator = 0.;
    }
}
