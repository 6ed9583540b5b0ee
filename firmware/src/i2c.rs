//! Bit-banged two-wire master.
//!
//! Drives an I2C bus over two GPIO pins so the sensor can hang off any
//! header, not just the hardware bus. Clock stretching is not supported; the
//! attached sensors never stretch.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::i2c::{self, NoAcknowledgeSource, Operation};

/// Half of one clock period, paced for roughly 100 kHz.
const HALF_BIT_US: u32 = 5;

/// Failure modes of the bit-banged bus.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftI2cError<E> {
    /// A GPIO operation failed.
    Pin(E),
    /// No device acknowledged the address byte.
    AddressNack,
    /// The device rejected a data byte.
    DataNack,
}

impl<E> From<E> for SoftI2cError<E> {
    fn from(error: E) -> Self {
        Self::Pin(error)
    }
}

impl<E: embedded_hal::digital::Error> i2c::Error for SoftI2cError<E> {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            SoftI2cError::Pin(_) => i2c::ErrorKind::Other,
            SoftI2cError::AddressNack => {
                i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            SoftI2cError::DataNack => i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
        }
    }
}

/// I2C master on two open-drain GPIO pins.
///
/// The data pin must be readable so acknowledge bits and incoming data can be
/// sampled while the output is released high.
pub struct SoftI2c<SCL, SDA, D> {
    scl: SCL,
    sda: SDA,
    delay: D,
}

impl<SCL, SDA, D> SoftI2c<SCL, SDA, D>
where
    SCL: OutputPin,
    SDA: OutputPin + InputPin + ErrorType<Error = SCL::Error>,
    D: DelayNs,
{
    pub fn new(scl: SCL, sda: SDA, delay: D) -> Self {
        Self { scl, sda, delay }
    }

    fn half_bit(&mut self) {
        self.delay.delay_us(HALF_BIT_US);
    }

    /// Start condition, also usable as a repeated start.
    fn start(&mut self) -> Result<(), SoftI2cError<SCL::Error>> {
        self.sda.set_high()?;
        self.scl.set_high()?;
        self.half_bit();
        self.sda.set_low()?;
        self.half_bit();
        self.scl.set_low()?;
        self.half_bit();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoftI2cError<SCL::Error>> {
        self.sda.set_low()?;
        self.half_bit();
        self.scl.set_high()?;
        self.half_bit();
        self.sda.set_high()?;
        self.half_bit();
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), SoftI2cError<SCL::Error>> {
        if bit {
            self.sda.set_high()?;
        } else {
            self.sda.set_low()?;
        }
        self.half_bit();
        self.scl.set_high()?;
        self.half_bit();
        self.scl.set_low()?;
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, SoftI2cError<SCL::Error>> {
        // Release the data line so the device can drive it.
        self.sda.set_high()?;
        self.half_bit();
        self.scl.set_high()?;
        self.half_bit();
        let bit = self.sda.is_high()?;
        self.scl.set_low()?;
        Ok(bit)
    }

    /// Clock out one byte, returns whether the device acknowledged it.
    fn write_byte(&mut self, byte: u8) -> Result<bool, SoftI2cError<SCL::Error>> {
        for i in (0..8).rev() {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        // Acknowledging devices pull the data line low.
        Ok(!self.read_bit()?)
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, SoftI2cError<SCL::Error>> {
        let mut byte = 0;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(self.read_bit()?);
        }
        self.write_bit(!ack)?;
        Ok(byte)
    }
}

impl<SCL, SDA, D> i2c::ErrorType for SoftI2c<SCL, SDA, D>
where
    SCL: OutputPin,
    SDA: OutputPin + InputPin + ErrorType<Error = SCL::Error>,
{
    type Error = SoftI2cError<SCL::Error>;
}

impl<SCL, SDA, D> i2c::I2c for SoftI2c<SCL, SDA, D>
where
    SCL: OutputPin,
    SDA: OutputPin + InputPin + ErrorType<Error = SCL::Error>,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }

        // Consecutive operations of the same kind continue the previous
        // transfer, a change of direction needs a repeated start and a fresh
        // address byte.
        let mut reading: Option<bool> = None;
        for i in 0..operations.len() {
            let is_read = matches!(operations[i], Operation::Read(_));
            let next_is_read = operations
                .get(i + 1)
                .map(|op| matches!(op, Operation::Read(_)));

            if reading != Some(is_read) {
                self.start()?;
                let sad = (address << 1) | u8::from(is_read);
                if !self.write_byte(sad)? {
                    self.stop()?;
                    return Err(SoftI2cError::AddressNack);
                }
                reading = Some(is_read);
            }

            match &mut operations[i] {
                Operation::Read(buf) => {
                    // Only the final byte before a direction change or the
                    // stop condition is left unacknowledged.
                    let last_in_run = next_is_read != Some(true);
                    let len = buf.len();
                    for (j, byte) in buf.iter_mut().enumerate() {
                        let ack = !(last_in_run && j + 1 == len);
                        *byte = self.read_byte(ack)?;
                    }
                }
                Operation::Write(bytes) => {
                    for &byte in *bytes {
                        if !self.write_byte(byte)? {
                            self.stop()?;
                            return Err(SoftI2cError::DataNack);
                        }
                    }
                }
            }
        }
        self.stop()
    }
}
