//! Driver for the Benewake TF-Luna in I2C mode.
//!
//! The sensor free-runs and keeps its latest measurement in a bank of
//! little-endian registers. The return amplitude is read alongside the
//! distance to reject weak and saturated measurements.

use embedded_hal::i2c::I2c;

use super::{RangeReading, RangeSensor, SensorError};

/// Default I2C address.
pub const DEFAULT_ADDRESS: u8 = 0x10;

/// First of the four result registers, distance low byte.
const REG_DIST_LOW: u8 = 0x00;

/// Returns weaker than this are unreliable.
const MIN_AMPLITUDE: u16 = 100;

/// Amplitude reported when the receiver saturates.
const SATURATED_AMPLITUDE: u16 = 0xFFFF;

/// The sensor is rated to eight meters.
const MAX_DISTANCE_CM: u16 = 800;

pub struct TfLuna<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> TfLuna<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
        }
    }
}

impl<I2C: I2c> RangeSensor for TfLuna<I2C> {
    type Error = SensorError<I2C::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read(&mut self) -> Result<RangeReading, Self::Error> {
        let mut buf = [0u8; 4];
        self.i2c.write_read(self.address, &[REG_DIST_LOW], &mut buf)?;
        let dist_cm = u16::from_le_bytes([buf[0], buf[1]]);
        let amplitude = u16::from_le_bytes([buf[2], buf[3]]);

        if amplitude < MIN_AMPLITUDE || amplitude == SATURATED_AMPLITUDE {
            return Ok(RangeReading::Nothing);
        }
        if dist_cm >= MAX_DISTANCE_CM {
            return Ok(RangeReading::OutOfRange);
        }
        Ok(RangeReading::Valid(dist_cm * 10))
    }
}
