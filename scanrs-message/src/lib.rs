//! Line-oriented serial protocol spoken between the scanner head and the
//! host. Every message is one ASCII line; commands travel host -> device,
//! responses device -> host. Shared by the firmware core, the simulator and
//! the host link so there is exactly one definition of the wire format.
#![cfg_attr(not(test), no_std)]

mod command;
mod params;
mod response;

pub use command::{Command, LiftDirection};
pub use params::{
    ParamError, ScanParams, MAX_THETA_STEPS_PER_REV, MIN_THETA_STEPS_PER_REV, SERIAL_BAUD,
};
pub use response::{PointRecord, Response};

/// Why a received line could not be turned into a [`Command`] or
/// [`Response`]. Borrows the offending input so the device can echo it back
/// in its error reply.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError<'a> {
    #[error("empty line")]
    Empty,
    #[error("unrecognized line")]
    Unrecognized,
    /// A `ROTATE*` command whose step count is missing, malformed or zero.
    /// `lift` distinguishes the vertical axis variants.
    #[error("invalid step count {input:?}")]
    InvalidSteps { lift: bool, input: &'a str },
    /// A `CONFIG` command whose fields are missing or not numeric.
    #[error("invalid config values")]
    InvalidConfig,
    #[error("invalid number")]
    InvalidNumber,
}
