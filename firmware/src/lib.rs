//! MCU-agnostic core of the scanner head firmware.
//!
//! Everything here is written against the `embedded-hal` traits so the same
//! scan sequencing logic runs on a real board, inside the simulator and
//! under plain host tests. The [`scanner::Scanner`] front-end owns the two
//! stepper axes, the range sensor and the settings memory and is driven by
//! calling [`scanner::Scanner::poll`] from the board's main loop.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod axis;
pub mod i2c;
pub mod line;
pub mod scanner;
pub mod sensor;
pub mod sequencer;
pub mod settings;

pub use scanrs_message;
