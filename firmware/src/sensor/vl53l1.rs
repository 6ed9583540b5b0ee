//! Driver for the ST VL53L1 time-of-flight sensor.
//!
//! The part starts ranging on its own after power-up, so the driver only has
//! to fetch the latest result over the 16-bit register index bus.

use embedded_hal::i2c::I2c;

use super::{RangeReading, RangeSensor, SensorError};

/// Factory-programmed I2C address.
pub const DEFAULT_ADDRESS: u8 = 0x29;

/// Final corrected range result in millimeters.
const REG_RESULT_RANGE_MM: u16 = 0x0096;

pub struct Vl53l1<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Vl53l1<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
        }
    }

    fn read_word(&mut self, reg: u16) -> Result<u16, SensorError<I2C::Error>> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &reg.to_be_bytes(), &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I2C: I2c> RangeSensor for Vl53l1<I2C> {
    type Error = SensorError<I2C::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read(&mut self) -> Result<RangeReading, Self::Error> {
        let mm = self.read_word(REG_RESULT_RANGE_MM)?;
        Ok(RangeReading::Valid(mm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    #[test]
    fn reads_the_result_register_big_endian() {
        let mut i2c = I2cMock::new(&[Transaction::write_read(
            DEFAULT_ADDRESS,
            vec![0x00, 0x96],
            vec![0x04, 0xD2],
        )]);

        let mut sensor = Vl53l1::new(i2c.clone());
        assert_eq!(sensor.read(), Ok(RangeReading::Valid(1234)));

        i2c.done();
    }
}
