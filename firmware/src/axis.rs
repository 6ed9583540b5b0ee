//! Step/dir stepper axes.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Half of one step pulse; two phases give a 1 kHz step rate.
const PULSE_HALF_PERIOD_US: u32 = 500;

/// Forward is clockwise for the turntable and towards the top for the lift.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// One motion axis. Implementations block until the move is done.
pub trait Axis {
    type Error;

    fn step(&mut self, direction: Direction, count: u32) -> Result<(), Self::Error>;
}

/// Axis driver for the common step/dir interface (A4988 and friends).
/// Forward drives the direction pin low, matching the rig wiring.
pub struct StepperPins<STEP, DIR, D> {
    step: STEP,
    dir: DIR,
    delay: D,
}

impl<STEP, DIR, D> StepperPins<STEP, DIR, D> {
    pub fn new(step: STEP, dir: DIR, delay: D) -> Self {
        Self { step, dir, delay }
    }
}

impl<STEP, DIR, D, E> Axis for StepperPins<STEP, DIR, D>
where
    STEP: OutputPin<Error = E>,
    DIR: OutputPin<Error = E>,
    D: DelayNs,
{
    type Error = E;

    fn step(&mut self, direction: Direction, count: u32) -> Result<(), E> {
        match direction {
            Direction::Forward => self.dir.set_low()?,
            Direction::Reverse => self.dir.set_high()?,
        }
        for _ in 0..count {
            self.step.set_low()?;
            self.delay.delay_us(PULSE_HALF_PERIOD_US);
            self.step.set_high()?;
            self.delay.delay_us(PULSE_HALF_PERIOD_US);
        }
        Ok(())
    }
}

/// The active-low enable line shared by both stepper drivers. Kept separate
/// from [`StepperPins`] because the rig wires one line to both drivers.
pub struct EnableLine<EN> {
    pin: EN,
}

impl<EN: OutputPin> EnableLine<EN> {
    pub fn new(pin: EN) -> Self {
        Self { pin }
    }

    pub fn enable(&mut self) -> Result<(), EN::Error> {
        self.pin.set_low()
    }

    /// Releases the motors so the rig can be positioned by hand.
    pub fn release(&mut self) -> Result<(), EN::Error> {
        self.pin.set_high()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction};

    #[test]
    fn forward_steps_pulse_low_then_high() {
        let mut step_expect = Vec::new();
        for _ in 0..3 {
            step_expect.push(Transaction::set(State::Low));
            step_expect.push(Transaction::set(State::High));
        }
        let mut step = PinMock::new(&step_expect);
        let mut dir = PinMock::new(&[Transaction::set(State::Low)]);

        let mut axis = StepperPins::new(step.clone(), dir.clone(), NoopDelay);
        axis.step(Direction::Forward, 3).unwrap();

        step.done();
        dir.done();
    }

    #[test]
    fn reverse_flips_the_direction_pin() {
        let mut step = PinMock::new(&[
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ]);
        let mut dir = PinMock::new(&[Transaction::set(State::High)]);

        let mut axis = StepperPins::new(step.clone(), dir.clone(), NoopDelay);
        axis.step(Direction::Reverse, 1).unwrap();

        step.done();
        dir.done();
    }

    #[test]
    fn zero_steps_still_sets_direction() {
        let mut step = PinMock::new(&[]);
        let mut dir = PinMock::new(&[Transaction::set(State::Low)]);

        let mut axis = StepperPins::new(step.clone(), dir.clone(), NoopDelay);
        axis.step(Direction::Forward, 0).unwrap();

        step.done();
        dir.done();
    }

    #[test]
    fn enable_line_is_active_low() {
        let mut pin = PinMock::new(&[
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ]);

        let mut enable = EnableLine::new(pin.clone());
        enable.enable().unwrap();
        enable.release().unwrap();

        pin.done();
    }
}
