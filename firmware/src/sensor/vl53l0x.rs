//! Driver for the ST VL53L0X time-of-flight sensor.
//!
//! Implements the bare single-shot ranging sequence: identify the device,
//! apply the vendor register accesses and poll `SYSRANGE_START` until the
//! measurement completes.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::{RangeReading, RangeSensor, SensorError};

/// Factory-programmed I2C address.
pub const DEFAULT_ADDRESS: u8 = 0x29;

/// Model id reported by a genuine VL53L0X.
const MODEL_ID: u8 = 0xEE;

/// Distances at or above this value mark an out-of-range measurement.
const OUT_OF_RANGE_MM: u16 = 8190;

/// Upper bound on the measurement poll, whatever the configured timeout says.
const MAX_POLL_MS: u16 = 100;

const REG_SYSRANGE_START: u8 = 0x00;
const REG_RESULT_RANGE: u8 = 0x14;
const REG_IDENTIFICATION_MODEL_ID: u8 = 0xC0;

pub struct Vl53l0x<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    timeout_ms: u16,
}

impl<I2C, D> Vl53l0x<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: DEFAULT_ADDRESS,
            timeout_ms: 500,
        }
    }

    /// Use a different measurement timeout in milliseconds.
    pub fn with_timeout(mut self, timeout_ms: u16) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), SensorError<I2C::Error>> {
        self.i2c.write(self.address, &[reg, value])?;
        Ok(())
    }

    fn read_byte(&mut self, reg: u8) -> Result<u8, SensorError<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, &[reg], &mut buf)?;
        Ok(buf[0])
    }
}

impl<I2C, D> RangeSensor for Vl53l0x<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    type Error = SensorError<I2C::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        let id = self.read_byte(REG_IDENTIFICATION_MODEL_ID)?;
        if id != MODEL_ID {
            return Err(SensorError::UnexpectedDevice { id });
        }

        // Vendor access sequence that readies single-shot ranging.
        self.write_byte(0x88, 0x00)?;
        self.write_byte(0x80, 0x01)?;
        self.write_byte(0xFF, 0x01)?;
        self.write_byte(0x00, 0x00)?;
        // Stop variable, unused in single-shot mode.
        let _ = self.read_byte(0x91)?;
        self.write_byte(0x00, 0x01)?;
        self.write_byte(0xFF, 0x00)?;
        self.write_byte(0x80, 0x00)?;
        Ok(())
    }

    fn read(&mut self) -> Result<RangeReading, Self::Error> {
        self.write_byte(REG_SYSRANGE_START, 0x01)?;

        // The start bit clears once the measurement is done.
        let mut started = false;
        for _ in 0..self.timeout_ms.min(MAX_POLL_MS) {
            if self.read_byte(REG_SYSRANGE_START)? & 0x01 == 0 {
                started = true;
                break;
            }
            self.delay.delay_ms(1);
        }
        if !started {
            return Ok(RangeReading::Nothing);
        }

        let mut result = [0u8; 12];
        self.i2c
            .write_read(self.address, &[REG_RESULT_RANGE], &mut result)?;
        let mm = u16::from_be_bytes([result[10], result[11]]);
        if mm >= OUT_OF_RANGE_MM {
            Ok(RangeReading::OutOfRange)
        } else {
            Ok(RangeReading::Valid(mm))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    #[test]
    fn init_checks_the_model_id() {
        let mut i2c = I2cMock::new(&[
            Transaction::write_read(DEFAULT_ADDRESS, vec![0xC0], vec![0xEE]),
            Transaction::write(DEFAULT_ADDRESS, vec![0x88, 0x00]),
            Transaction::write(DEFAULT_ADDRESS, vec![0x80, 0x01]),
            Transaction::write(DEFAULT_ADDRESS, vec![0xFF, 0x01]),
            Transaction::write(DEFAULT_ADDRESS, vec![0x00, 0x00]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x91], vec![0x3C]),
            Transaction::write(DEFAULT_ADDRESS, vec![0x00, 0x01]),
            Transaction::write(DEFAULT_ADDRESS, vec![0xFF, 0x00]),
            Transaction::write(DEFAULT_ADDRESS, vec![0x80, 0x00]),
        ]);

        let mut sensor = Vl53l0x::new(i2c.clone(), NoopDelay);
        sensor.init().unwrap();

        i2c.done();
    }

    #[test]
    fn init_rejects_an_unknown_device() {
        let mut i2c = I2cMock::new(&[Transaction::write_read(
            DEFAULT_ADDRESS,
            vec![0xC0],
            vec![0x44],
        )]);

        let mut sensor = Vl53l0x::new(i2c.clone(), NoopDelay);
        assert_eq!(sensor.init(), Err(SensorError::UnexpectedDevice { id: 0x44 }));

        i2c.done();
    }

    #[test]
    fn read_waits_for_the_start_bit_to_clear() {
        let mut result = vec![0u8; 12];
        result[10] = 0x02;
        result[11] = 0x9A;
        let mut i2c = I2cMock::new(&[
            Transaction::write(DEFAULT_ADDRESS, vec![0x00, 0x01]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x00], vec![0x01]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x00], vec![0x00]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x14], result),
        ]);

        let mut sensor = Vl53l0x::new(i2c.clone(), NoopDelay);
        assert_eq!(sensor.read(), Ok(RangeReading::Valid(666)));

        i2c.done();
    }

    #[test]
    fn read_times_out_to_no_reading() {
        let mut i2c = I2cMock::new(&[
            Transaction::write(DEFAULT_ADDRESS, vec![0x00, 0x01]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x00], vec![0x01]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x00], vec![0x01]),
        ]);

        let mut sensor = Vl53l0x::new(i2c.clone(), NoopDelay).with_timeout(2);
        assert_eq!(sensor.read(), Ok(RangeReading::Nothing));

        i2c.done();
    }

    #[test]
    fn read_reports_out_of_range() {
        let mut result = vec![0u8; 12];
        result[10] = 0x1F;
        result[11] = 0xFE;
        let mut i2c = I2cMock::new(&[
            Transaction::write(DEFAULT_ADDRESS, vec![0x00, 0x01]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x00], vec![0x00]),
            Transaction::write_read(DEFAULT_ADDRESS, vec![0x14], result),
        ]);

        let mut sensor = Vl53l0x::new(i2c.clone(), NoopDelay);
        assert_eq!(sensor.read(), Ok(RangeReading::OutOfRange));

        i2c.done();
    }
}
