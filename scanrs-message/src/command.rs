use core::fmt;

use serde::{Deserialize, Serialize};

use crate::params::ScanParams;
use crate::ParseError;

/// Direction the sensor carriage travels between layers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiftDirection {
    Up,
    Down,
}

impl LiftDirection {
    pub fn reversed(self) -> Self {
        match self {
            LiftDirection::Up => LiftDirection::Down,
            LiftDirection::Down => LiftDirection::Up,
        }
    }
}

/// One host -> device command line.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    /// Begin a host-stepped scan from layer 0, slot 0.
    Start { direction: LiftDirection },
    /// Advance a host-stepped scan by one slot.
    ScanStep,
    Stop,
    Resume,
    /// Drive the carriage back to the home (bottom) position.
    Home,
    MoveToTop,
    /// One diagnostic distance reading, human readable reply.
    Test,
    /// One distance reading tagged with the current turntable angle.
    TestPoint,
    /// Jog the turntable. `ccw` selects the reverse direction.
    Rotate { steps: u16, ccw: bool },
    /// Jog the carriage. `ccw` moves away from the top.
    RotateLift { steps: u16, ccw: bool },
    Configure(ScanParams),
    GetConfig,
    /// One raw distance reading, machine readable reply.
    ReadDistance,
}

/// Longest command keyword is `ROTATE_Z_CCW` (12 bytes).
const MAX_KEYWORD: usize = 16;

impl Command {
    /// Parses one received line. Keywords are matched case-insensitively
    /// and surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Command, ParseError<'_>> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let (head, args) = match line.find(',') {
            Some(idx) => (&line[..idx], Some(&line[idx + 1..])),
            None => (line, None),
        };

        let head = head.trim().as_bytes();
        if head.len() > MAX_KEYWORD {
            return Err(ParseError::Unrecognized);
        }
        let mut upper = [0u8; MAX_KEYWORD];
        let upper = &mut upper[..head.len()];
        upper.copy_from_slice(head);
        upper.make_ascii_uppercase();

        match (&*upper, args) {
            (b"START" | b"START_UP", None) => Ok(Command::Start {
                direction: LiftDirection::Up,
            }),
            (b"START_DOWN", None) => Ok(Command::Start {
                direction: LiftDirection::Down,
            }),
            (b"SCAN_STEP", None) => Ok(Command::ScanStep),
            (b"STOP", None) => Ok(Command::Stop),
            (b"RESUME", None) => Ok(Command::Resume),
            (b"HOME", None) => Ok(Command::Home),
            (b"MOVE_TO_TOP", None) => Ok(Command::MoveToTop),
            (b"TEST", None) => Ok(Command::Test),
            (b"TEST_POINT", None) => Ok(Command::TestPoint),
            (b"GET_CONFIG", None) => Ok(Command::GetConfig),
            (b"READ_LIDAR", None) => Ok(Command::ReadDistance),
            (b"ROTATE", Some(args)) => Ok(Command::Rotate {
                steps: parse_steps(args, false)?,
                ccw: false,
            }),
            (b"ROTATE_CCW", Some(args)) => Ok(Command::Rotate {
                steps: parse_steps(args, false)?,
                ccw: true,
            }),
            (b"ROTATE_Z", Some(args)) => Ok(Command::RotateLift {
                steps: parse_steps(args, true)?,
                ccw: false,
            }),
            (b"ROTATE_Z_CCW", Some(args)) => Ok(Command::RotateLift {
                steps: parse_steps(args, true)?,
                ccw: true,
            }),
            (b"CONFIG", Some(args)) => Ok(Command::Configure(parse_config(args)?)),
            _ => Err(ParseError::Unrecognized),
        }
    }
}

/// A jog step count must be a positive integer; anything else is reported
/// back to the host together with the offending text.
fn parse_steps(input: &str, lift: bool) -> Result<u16, ParseError<'_>> {
    match input.trim().parse::<u16>() {
        Ok(steps) if steps > 0 => Ok(steps),
        _ => Err(ParseError::InvalidSteps { lift, input }),
    }
}

/// `CONFIG` carries five required integer fields followed by an optional
/// center distance and an optional steps-per-revolution. Absent optional
/// fields take the documented defaults.
fn parse_config(args: &str) -> Result<ScanParams, ParseError<'_>> {
    let defaults = ScanParams::default();
    let mut fields = args.split(',');

    let theta_steps_per_rev = next_u16(&mut fields)?;
    let z_travel_mm = next_u16(&mut fields)?;
    let z_steps_per_mm = next_u16(&mut fields)?;
    let z_steps_per_layer = next_u16(&mut fields)?;
    let scan_delay_ms = next_u16(&mut fields)?;

    let center_distance_cm = match fields.next() {
        Some(field) => field
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidConfig)?,
        None => defaults.center_distance_cm,
    };
    let steps_per_rev = match fields.next() {
        Some(field) => field
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidConfig)?,
        None => defaults.steps_per_rev,
    };
    if fields.next().is_some() {
        return Err(ParseError::InvalidConfig);
    }

    Ok(ScanParams {
        theta_steps_per_rev,
        z_travel_mm,
        z_steps_per_mm,
        z_steps_per_layer,
        scan_delay_ms,
        center_distance_cm,
        steps_per_rev,
    })
}

fn next_u16<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<u16, ParseError<'a>> {
    fields
        .next()
        .ok_or(ParseError::InvalidConfig)?
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidConfig)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Start {
                direction: LiftDirection::Up,
            } => write!(f, "START_UP"),
            Command::Start {
                direction: LiftDirection::Down,
            } => write!(f, "START_DOWN"),
            Command::ScanStep => write!(f, "SCAN_STEP"),
            Command::Stop => write!(f, "STOP"),
            Command::Resume => write!(f, "RESUME"),
            Command::Home => write!(f, "HOME"),
            Command::MoveToTop => write!(f, "MOVE_TO_TOP"),
            Command::Test => write!(f, "TEST"),
            Command::TestPoint => write!(f, "TEST_POINT"),
            Command::Rotate { steps, ccw: false } => write!(f, "ROTATE,{steps}"),
            Command::Rotate { steps, ccw: true } => write!(f, "ROTATE_CCW,{steps}"),
            Command::RotateLift { steps, ccw: false } => write!(f, "ROTATE_Z,{steps}"),
            Command::RotateLift { steps, ccw: true } => write!(f, "ROTATE_Z_CCW,{steps}"),
            Command::Configure(p) => write!(
                f,
                "CONFIG,{},{},{},{},{},{:.1},{}",
                p.theta_steps_per_rev,
                p.z_travel_mm,
                p.z_steps_per_mm,
                p.z_steps_per_layer,
                p.scan_delay_ms,
                p.center_distance_cm,
                p.steps_per_rev
            ),
            Command::GetConfig => write!(f, "GET_CONFIG"),
            Command::ReadDistance => write!(f, "READ_LIDAR"),
        }
    }
}
