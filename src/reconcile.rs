//! Reconfiguration of a running [`Stabilizer`].
//!
//! Settings always flow one way: from the tuning records into the active bank and the
//! controllers, never back. Reconfiguring only replaces gains; integral accumulators
//! carry on so retuning in flight doesn't bump the outputs.

use crate::axis::Axis;
use crate::filter::{decay_coefficient, REFERENCE_DT};
use crate::pid::{DerivativeFilter, PidGains, PidRole};
use crate::settings::{BankId, StabilizationBank, StabilizationSettings};
use crate::stabilizer::Stabilizer;
use log::{debug, warn};

/// Coefficients derived from [`StabilizationSettings`] whenever they change.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coefficients {
    /// Per-step decay of the gyro low-pass.
    pub gyro_alpha: f32,
    /// Per-step decay of the virtual flybar angle.
    pub vbar_decay: f32,
}

impl Coefficients {
    pub fn derive(settings: &StabilizationSettings) -> Self {
        Self {
            gyro_alpha: decay_coefficient(REFERENCE_DT, settings.gyro_tau),
            vbar_decay: decay_coefficient(REFERENCE_DT, settings.virtual_bar.tau),
        }
    }
}

impl<V, R> Stabilizer<V, R> {
    /// Replace the global settings and derive everything that depends on them.
    ///
    /// The next cycle reselects the bank for the current flight mode switch position.
    pub fn on_settings_updated(&mut self, settings: StabilizationSettings) {
        self.settings = settings;

        self.coefficients = Coefficients::derive(&self.settings);
        for (_, filter) in self.gyro_filter.iter_mut() {
            filter.set_alpha(self.coefficients.gyro_alpha);
        }
        self.pids.configure_derivative(DerivativeFilter::new(
            self.settings.derivative_cutoff,
            self.settings.derivative_gamma,
        ));

        self.selected_position = None;
        debug!(
            "stabilization: settings updated (gyro alpha {}, flybar decay {})",
            self.coefficients.gyro_alpha, self.coefficients.vbar_decay
        );
    }

    /// Store an underlying bank, activating it if the current switch position selects it.
    pub fn on_settings_bank_updated(&mut self, id: BankId, bank: StabilizationBank) {
        self.settings_banks[id.index()] = bank;

        let selected = self
            .selected_position
            .and_then(|position| self.settings.bank_for_position(position).ok());
        if selected == Some(id) {
            self.activate_bank(id);
        } else {
            debug!("stabilization: {:?} updated, not selected", id);
        }
    }

    /// Activate the bank mapped to a flight mode switch position.
    ///
    /// Invalid positions and map entries keep the current bank.
    pub fn select_flight_mode(&mut self, position: u8) {
        self.selected_position = Some(position);

        match self.settings.bank_for_position(position) {
            Ok(id) => self.activate_bank(id),
            Err(error) => warn!(
                "stabilization: flight mode position {} keeps the active bank ({})",
                position, error
            ),
        }
    }

    /// Replace the active bank and push its gains into the controllers.
    pub fn on_bank_updated(&mut self, bank: StabilizationBank) {
        for axis in Axis::ALL {
            let rate = bank.rate_pid[axis];
            let attitude = bank.attitude_pi[axis];

            self.pids[(PidRole::Rate, axis)].configure(rate);
            self.pids[(PidRole::Attitude, axis)]
                .configure(PidGains::pi(attitude.kp, attitude.ki, attitude.i_limit));
            self.pids[(PidRole::RattitudeRate, axis)].configure(rate);
        }
        self.bank = bank;
    }

    fn activate_bank(&mut self, id: BankId) {
        debug!("stabilization: activating {:?}", id);
        let bank = self.settings_banks[id.index()].clone();
        self.on_bank_updated(bank);
    }
}
