//! The stabilization control loop as a tokio task.
//!
//! Each gyro sample received on the trigger channel runs one [`Stabilizer::step`].
//! The other inputs are read from `watch` channels, so the loop always sees the
//! latest value without queueing stale ones. Reconfiguration arrives as
//! [`Notification`]s and is applied by the loop itself, between cycles.

use crate::collaborator::{RelayTuner, VirtualFlybar};
use crate::settings::{BankId, StabilizationBank, StabilizationSettings};
use crate::stabilizer::{ActuatorDesired, ControlInputs, GyroState, RateDesired, Stabilizer};
use crate::timing::DeltaTime;
use core::time::Duration;
use embedded_time::Clock;
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

const TASK_ID: &str = "stabilization";

/// Gyro samples waiting for the loop. A sample only matters until the next one arrives.
const GYRO_QUEUE_SIZE: usize = 1;

const NOTIFICATION_QUEUE_SIZE: usize = 8;

/// Health of the stabilization loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlarmState {
    #[default]
    Clear,
    /// No gyro sample arrived within the failsafe timeout.
    Warning,
    /// An axis carried an unrecognized mode.
    Error,
}

/// Reconfiguration messages for a running loop.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Settings(StabilizationSettings),
    SettingsBank(BankId, StabilizationBank),
    /// Directly replace the active bank.
    Bank(StabilizationBank),
}

/// Loop timing constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StabilizationTaskConfig {
    pub failsafe_timeout: Duration,
    /// Expected period (in seconds) the time step estimate starts at.
    pub expected_dt: f32,
    pub min_dt: f32,
    pub max_dt: f32,
    /// Weight of each new period in the time step average.
    pub dt_alpha: f32,
}

impl Default for StabilizationTaskConfig {
    fn default() -> Self {
        Self {
            failsafe_timeout: Duration::from_millis(30),
            expected_dt: 1. / 666.,
            min_dt: 1.0e-6,
            max_dt: 1.,
            dt_alpha: 0.01,
        }
    }
}

impl StabilizationTaskConfig {
    pub fn with_failsafe_timeout(mut self, timeout: Duration) -> Self {
        self.failsafe_timeout = timeout;
        self
    }

    pub fn with_expected_dt(mut self, expected_dt: f32) -> Self {
        self.expected_dt = expected_dt;
        self
    }

    pub fn with_dt_limits(mut self, min_dt: f32, max_dt: f32) -> Self {
        self.min_dt = min_dt;
        self.max_dt = max_dt;
        self
    }

    pub fn with_dt_alpha(mut self, dt_alpha: f32) -> Self {
        self.dt_alpha = dt_alpha;
        self
    }
}

/// The outside ends of a [`StabilizationTask`]'s channels.
///
/// Dropping `gyro` stops the task.
pub struct StabilizationHandle {
    pub gyro: mpsc::Sender<GyroState>,
    pub inputs: watch::Sender<ControlInputs>,
    pub notifications: mpsc::Sender<Notification>,
    pub actuator: watch::Receiver<ActuatorDesired>,
    pub rate: watch::Receiver<RateDesired>,
    pub alarm: watch::Receiver<AlarmState>,
}

enum Wake {
    Gyro(GyroState),
    Closed,
    Failsafe,
}

pub struct StabilizationTask<C, V = (), R = ()> {
    stabilizer: Stabilizer<V, R>,
    dt: DeltaTime<C>,
    config: StabilizationTaskConfig,
    gyro: mpsc::Receiver<GyroState>,
    inputs: watch::Receiver<ControlInputs>,
    notifications: mpsc::Receiver<Notification>,
    actuator: watch::Sender<ActuatorDesired>,
    rate: watch::Sender<RateDesired>,
    alarm: watch::Sender<AlarmState>,
}

impl<C, V, R> StabilizationTask<C, V, R>
where
    C: Clock<T = u32>,
    V: VirtualFlybar,
    R: RelayTuner,
{
    /// Create the task and the handle used to feed it.
    pub fn new(
        stabilizer: Stabilizer<V, R>,
        clock: C,
        config: StabilizationTaskConfig,
    ) -> (Self, StabilizationHandle) {
        let (gyro_tx, gyro_rx) = mpsc::channel(GYRO_QUEUE_SIZE);
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_QUEUE_SIZE);
        let (inputs_tx, inputs_rx) = watch::channel(ControlInputs::default());
        let (actuator_tx, actuator_rx) = watch::channel(*stabilizer.actuator_desired());
        let (rate_tx, rate_rx) = watch::channel(*stabilizer.rate_desired());
        let (alarm_tx, alarm_rx) = watch::channel(AlarmState::Clear);

        let dt = DeltaTime::new(
            clock,
            config.expected_dt,
            config.min_dt,
            config.max_dt,
            config.dt_alpha,
        );

        let task = Self {
            stabilizer,
            dt,
            config,
            gyro: gyro_rx,
            inputs: inputs_rx,
            notifications: notification_rx,
            actuator: actuator_tx,
            rate: rate_tx,
            alarm: alarm_tx,
        };
        let handle = StabilizationHandle {
            gyro: gyro_tx,
            inputs: inputs_tx,
            notifications: notification_tx,
            actuator: actuator_rx,
            rate: rate_rx,
            alarm: alarm_rx,
        };
        (task, handle)
    }

    /// Run until the gyro feed closes, then hand the stabilizer back.
    pub async fn run(mut self) -> Stabilizer<V, R> {
        info!("{}: Entering main loop", TASK_ID);

        loop {
            match self.wait().await {
                Wake::Gyro(gyro) => self.cycle(&gyro),
                Wake::Failsafe => {
                    warn!(
                        "{}: no gyro update within {:?}",
                        TASK_ID, self.config.failsafe_timeout
                    );
                    self.set_alarm(AlarmState::Warning);
                }
                Wake::Closed => {
                    info!("{}: gyro feed closed, stopping", TASK_ID);
                    return self.stabilizer;
                }
            }
        }
    }

    /// Wait for the next gyro sample, applying notifications in the meantime.
    async fn wait(&mut self) -> Wake {
        // Reconfiguration doesn't extend the failsafe window
        let deadline = Instant::now() + self.config.failsafe_timeout;

        loop {
            tokio::select! {
                biased;

                Some(notification) = self.notifications.recv() => self.handle(notification),
                gyro = self.gyro.recv() => {
                    return gyro.map_or(Wake::Closed, Wake::Gyro);
                }
                _ = time::sleep_until(deadline) => return Wake::Failsafe,
            }
        }
    }

    fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::Settings(settings) => self.stabilizer.on_settings_updated(settings),
            Notification::SettingsBank(id, bank) => {
                self.stabilizer.on_settings_bank_updated(id, bank)
            }
            Notification::Bank(bank) => self.stabilizer.on_bank_updated(bank),
        }
    }

    fn cycle(&mut self, gyro: &GyroState) {
        let dt = self.dt.sample();
        let inputs = *self.inputs.borrow();

        let report = self.stabilizer.step(&inputs, gyro, dt);

        self.rate.send_replace(*self.stabilizer.rate_desired());
        if report.published {
            self.actuator.send_replace(*self.stabilizer.actuator_desired());
        }

        match report.unrecognized {
            Some((axis, mode)) => {
                if self.set_alarm(AlarmState::Error) {
                    error!("{}: {:?} axis in unrecognized mode {:?}", TASK_ID, axis, mode);
                }
            }
            None => {
                if self.set_alarm(AlarmState::Clear) {
                    info!("{}: alarm cleared", TASK_ID);
                }
            }
        }
    }

    /// Returns true if the alarm changed.
    fn set_alarm(&self, state: AlarmState) -> bool {
        self.alarm.send_if_modified(|current| {
            let modified = *current != state;
            *current = state;
            modified
        })
    }
}
