use core::fmt;
use embedded_time::{clock, ConversionError};

/// An error raised while reading the time source or resolving tuning records.
#[derive(Debug)]
pub enum Error {
    Clock(clock::Error),
    Time(ConversionError),
    /// A flight-mode map entry that does not name one of the three settings banks.
    InvalidBank(u8),
    /// A flight-mode switch position outside of the supported positions.
    InvalidSwitchPosition(u8),
}

impl From<clock::Error> for Error {
    fn from(clock_error: clock::Error) -> Self {
        Error::Clock(clock_error)
    }
}

impl From<ConversionError> for Error {
    fn from(time_error: ConversionError) -> Self {
        Error::Time(time_error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Clock(e) => write!(f, "clock error: {:?}", e),
            Error::Time(e) => write!(f, "time conversion error: {:?}", e),
            Error::InvalidBank(bank) => write!(f, "invalid settings bank {}", bank),
            Error::InvalidSwitchPosition(pos) => {
                write!(f, "invalid flight mode switch position {}", pos)
            }
        }
    }
}

impl std::error::Error for Error {}
