//! Time-of-flight range sensors.
//!
//! Every supported sensor implements [`RangeSensor`] so the rest of the
//! firmware stays agnostic of the attached hardware. The drivers speak raw
//! register-level I2C and report distances in millimeters.

pub mod tfluna;
pub mod vl53l0x;
pub mod vl53l1;

pub use tfluna::TfLuna;
pub use vl53l0x::Vl53l0x;
pub use vl53l1::Vl53l1;

/// Outcome of a single range measurement.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeReading {
    /// Distance to the target in millimeters.
    Valid(u16),
    /// The sensor answered but the target is beyond its rated range.
    OutOfRange,
    /// No usable return signal.
    Nothing,
}

/// A time-of-flight sensor that produces single-shot distance readings.
pub trait RangeSensor {
    type Error;

    /// Prepare the sensor for measurements, called once at boot.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Trigger one measurement and wait for its result.
    fn read(&mut self) -> Result<RangeReading, Self::Error>;
}

/// Errors shared by the sensor drivers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError<E> {
    /// The underlying bus transfer failed.
    Bus(E),
    /// The device at the expected address did not identify as the right model.
    UnexpectedDevice { id: u8 },
}

impl<E> From<E> for SensorError<E> {
    fn from(error: E) -> Self {
        Self::Bus(error)
    }
}
