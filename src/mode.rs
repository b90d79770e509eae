/// Control law selected for one axis.
///
/// Tags arrive from the outside world as integers; anything outside of the known
/// laws is kept as [`StabilizationMode::Unrecognized`] so the control loop can
/// raise a fault for it instead of guessing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StabilizationMode {
    /// Stick input goes straight to the actuator.
    #[default]
    None,
    /// Stick commands a rotation rate.
    Rate,
    /// Stick commands an angle.
    Attitude,
    /// Rate mode that holds the accumulated attitude while the stick is near center.
    AxisLock,
    /// Rate mode biased back towards level.
    WeakLeveling,
    /// Virtual flybar, for flybarless helicopters.
    VirtualBar,
    /// Attitude at center stick, blending into Rate at full stick.
    Rattitude,
    /// Relay tuning around the rate loop.
    RelayRate,
    /// Relay tuning around the rate loop behind an attitude loop.
    RelayAttitude,
    /// A tag that doesn't name any known control law.
    Unrecognized(u8),
}

impl From<u8> for StabilizationMode {
    fn from(tag: u8) -> Self {
        match tag {
            0 => StabilizationMode::None,
            1 => StabilizationMode::Rate,
            2 => StabilizationMode::Attitude,
            3 => StabilizationMode::AxisLock,
            4 => StabilizationMode::WeakLeveling,
            5 => StabilizationMode::VirtualBar,
            6 => StabilizationMode::Rattitude,
            7 => StabilizationMode::RelayRate,
            8 => StabilizationMode::RelayAttitude,
            other => StabilizationMode::Unrecognized(other),
        }
    }
}

impl From<StabilizationMode> for u8 {
    fn from(mode: StabilizationMode) -> Self {
        match mode {
            StabilizationMode::None => 0,
            StabilizationMode::Rate => 1,
            StabilizationMode::Attitude => 2,
            StabilizationMode::AxisLock => 3,
            StabilizationMode::WeakLeveling => 4,
            StabilizationMode::VirtualBar => 5,
            StabilizationMode::Rattitude => 6,
            StabilizationMode::RelayRate => 7,
            StabilizationMode::RelayAttitude => 8,
            StabilizationMode::Unrecognized(tag) => tag,
        }
    }
}
