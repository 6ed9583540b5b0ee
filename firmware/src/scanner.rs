//! The scanner control loop.
//!
//! [`Scanner`] ties the axes, the range sensor, the stored settings and the
//! serial protocol together. The owner calls [`Scanner::poll`] in a loop;
//! each poll drains and answers incoming command lines, then advances a
//! free-running scan by at most one slot so a `STOP` arriving between slots
//! is honored.

use core::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::{Read, Write};

use scanrs_message::{Command, LiftDirection, ParseError, PointRecord, Response, ScanParams};

use crate::axis::{Axis, Direction};
use crate::line::{write_line, FmtBuffer, LineReader};
use crate::sensor::{RangeReading, RangeSensor};
use crate::sequencer::{Pacing, ScanState, Sequencer, SlotPlan};
use crate::settings::{self, NvMemory};

/// Longest distance accepted as a real measurement.
const MAX_VALID_DISTANCE_MM: u16 = 1200;

/// Command lines longer than this are discarded.
const LINE_BUFFER: usize = 64;

/// Faults a poll can surface: a motor driver or the serial port failing.
/// Sensor trouble is never fatal, it degrades to empty readings.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerError<ME, WE> {
    Motion(ME),
    Serial(WE),
}

pub struct Scanner<ROT, LIFT, SEN, NV, D> {
    reader: LineReader<LINE_BUFFER>,
    core: Core<ROT, LIFT, SEN, NV, D>,
}

struct Core<ROT, LIFT, SEN, NV, D> {
    rotation: ROT,
    lift: LIFT,
    sensor: SEN,
    nv: NV,
    delay: D,
    seq: Sequencer,
    sensor_ok: bool,
}

impl<ROT, LIFT, SEN, NV, D> Scanner<ROT, LIFT, SEN, NV, D>
where
    ROT: Axis,
    LIFT: Axis<Error = ROT::Error>,
    SEN: RangeSensor,
    NV: NvMemory,
    D: DelayNs,
{
    /// Build a scanner around its peripherals, with the stored parameters
    /// (or the defaults when nothing valid is stored).
    pub fn new(rotation: ROT, lift: LIFT, sensor: SEN, mut nv: NV, delay: D) -> Self {
        let params = settings::load(&mut nv);
        Self {
            reader: LineReader::new(),
            core: Core {
                rotation,
                lift,
                sensor,
                nv,
                delay,
                seq: Sequencer::new(params),
                sensor_ok: false,
            },
        }
    }

    /// Bring up the sensor and emit the boot banner and current config.
    pub fn announce<W: Write<u8>>(
        &mut self,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        self.core.announce(tx)
    }

    /// Handle pending command lines, then advance a free-running scan by at
    /// most one slot.
    pub fn poll<R, W>(
        &mut self,
        rx: &mut R,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>>
    where
        R: Read<u8>,
        W: Write<u8>,
    {
        let Self { reader, core } = self;
        let mut result = Ok(());
        reader.consume(rx, |line| {
            if result.is_ok() {
                result = core.handle_line(line, tx);
            }
        });
        result?;
        core.run_pending(tx)
    }

    pub fn state(&self) -> ScanState {
        self.core.seq.state()
    }

    pub fn params(&self) -> &ScanParams {
        self.core.seq.params()
    }
}

fn send<ME, W: Write<u8>>(
    tx: &mut W,
    response: &Response<'_>,
) -> Result<(), ScannerError<ME, W::Error>> {
    write_line(tx, response).map_err(ScannerError::Serial)
}

fn lift_direction(direction: LiftDirection) -> Direction {
    match direction {
        LiftDirection::Up => Direction::Forward,
        LiftDirection::Down => Direction::Reverse,
    }
}

impl<ROT, LIFT, SEN, NV, D> Core<ROT, LIFT, SEN, NV, D>
where
    ROT: Axis,
    LIFT: Axis<Error = ROT::Error>,
    SEN: RangeSensor,
    NV: NvMemory,
    D: DelayNs,
{
    fn announce<W: Write<u8>>(
        &mut self,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        // sensor power-up settle
        self.delay.delay_ms(100);
        self.sensor_ok = self.sensor.init().is_ok();

        send(tx, &Response::Ready)?;
        if !self.sensor_ok {
            send(tx, &Response::Error("range sensor not responding"))?;
        }
        send(tx, &Response::CurrentConfig(*self.seq.params()))
    }

    fn handle_line<W: Write<u8>>(
        &mut self,
        line: &str,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        match Command::parse(line) {
            Ok(command) => self.dispatch(command, tx),
            Err(ParseError::InvalidSteps { lift, input }) => {
                let mut text: FmtBuffer<48> = FmtBuffer::new();
                let _ = write!(text, "Invalid steps: {input}");
                let response = if lift {
                    Response::RotateLiftError(text.as_str())
                } else {
                    Response::RotateError(text.as_str())
                };
                send(tx, &response)
            }
            Err(ParseError::InvalidConfig) => send(tx, &Response::ConfigError("Invalid values")),
            // blank and unknown lines are ignored
            Err(_) => Ok(()),
        }
    }

    fn dispatch<W: Write<u8>>(
        &mut self,
        command: Command,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        match command {
            Command::Start { direction } => {
                self.seq.start(direction);
                send(tx, &Response::ScanStart)
            }
            Command::ScanStep => {
                if !matches!(
                    self.seq.state(),
                    ScanState::Scanning {
                        pacing: Pacing::HostStepped,
                        ..
                    }
                ) {
                    return send(tx, &Response::Error("Not in step-by-step scan mode!"));
                }
                self.advance_one_slot(tx)
            }
            Command::Stop => {
                let was_free_running = matches!(
                    self.seq.state(),
                    ScanState::Scanning {
                        pacing: Pacing::FreeRunning,
                        ..
                    }
                );
                let progress = self.seq.stop();
                send(tx, &Response::ScanPaused)?;
                if was_free_running {
                    let mut text: FmtBuffer<48> = FmtBuffer::new();
                    let _ = write!(
                        text,
                        "Stopped at layer={}, step={}",
                        progress.layer, progress.step
                    );
                    send(tx, &Response::Info(text.as_str()))?;
                }
                Ok(())
            }
            Command::Resume => {
                let Some(resume) = self.seq.resume() else {
                    // nothing paused, treated like an unknown line
                    return Ok(());
                };
                send(tx, &Response::ScanResumed)?;
                if resume.move_to_top_first {
                    send(tx, &Response::Info("Moving to top position"))?;
                    self.vertical_sweep(Direction::Forward)
                        .map_err(ScannerError::Motion)?;
                    self.delay.delay_ms(500);
                }
                let params = self.seq.params();
                let mut text: FmtBuffer<128> = FmtBuffer::new();
                let _ = write!(
                    text,
                    "Resuming at layer={}, step={} - layers={}, steps_per_point={}, remainder={}",
                    resume.progress.layer,
                    resume.progress.step,
                    params.layers(),
                    params.steps_per_point(),
                    params.steps_remainder()
                );
                send(tx, &Response::Info(text.as_str()))
            }
            Command::Home => {
                if self.is_busy() {
                    return send(tx, &Response::Error("busy"));
                }
                self.vertical_sweep(Direction::Reverse)
                    .map_err(ScannerError::Motion)?;
                send(tx, &Response::HomeComplete)
            }
            Command::MoveToTop => {
                if self.is_busy() {
                    return send(tx, &Response::Error("busy"));
                }
                send(tx, &Response::Info("Moving to top position"))?;
                self.vertical_sweep(Direction::Forward)
                    .map_err(ScannerError::Motion)?;
                send(tx, &Response::MoveToTopComplete)
            }
            Command::Test => {
                let cm = self.read_distance_cm();
                send(tx, &Response::TestDistance(cm))
            }
            Command::TestPoint => {
                let cm = self.read_distance_cm();
                send(
                    tx,
                    &Response::TestPoint {
                        angle_deg: self.seq.theta_angle_deg(),
                        distance_cm: cm,
                    },
                )
            }
            Command::ReadDistance => {
                let cm = self.read_distance_cm();
                send(tx, &Response::Distance(cm))
            }
            Command::Rotate { steps, ccw } => {
                if self.is_busy() {
                    return send(tx, &Response::Error("busy"));
                }
                let direction = if ccw {
                    Direction::Reverse
                } else {
                    Direction::Forward
                };
                self.rotation
                    .step(direction, u32::from(steps))
                    .map_err(ScannerError::Motion)?;
                let signed = if ccw {
                    -i32::from(steps)
                } else {
                    i32::from(steps)
                };
                self.seq.offset_theta(signed);
                send(tx, &Response::Rotated(signed))
            }
            Command::RotateLift { steps, ccw } => {
                if self.is_busy() {
                    return send(tx, &Response::Error("busy"));
                }
                let direction = if ccw {
                    Direction::Reverse
                } else {
                    Direction::Forward
                };
                self.lift
                    .step(direction, u32::from(steps))
                    .map_err(ScannerError::Motion)?;
                let signed = if ccw {
                    -i32::from(steps)
                } else {
                    i32::from(steps)
                };
                send(tx, &Response::RotatedLift(signed))
            }
            Command::Configure(params) => {
                if let Err(error) = params.validate() {
                    let mut text: FmtBuffer<64> = FmtBuffer::new();
                    let _ = write!(text, "{error}");
                    return send(tx, &Response::ConfigError(text.as_str()));
                }
                if self.seq.set_params(params).is_err() {
                    return send(tx, &Response::ConfigError("scan in progress"));
                }
                settings::store(&mut self.nv, &params);
                send(tx, &Response::ConfigOk(params))
            }
            Command::GetConfig => send(tx, &Response::CurrentConfig(*self.seq.params())),
        }
    }

    /// Free-running scans advance one slot per poll.
    fn run_pending<W: Write<u8>>(
        &mut self,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        if matches!(
            self.seq.state(),
            ScanState::Scanning {
                pacing: Pacing::FreeRunning,
                ..
            }
        ) {
            self.advance_one_slot(tx)?;
        }
        Ok(())
    }

    fn advance_one_slot<W: Write<u8>>(
        &mut self,
        tx: &mut W,
    ) -> Result<(), ScannerError<ROT::Error, W::Error>> {
        let Some(plan) = self.seq.next_slot() else {
            return Ok(());
        };
        let free_running = matches!(
            self.seq.state(),
            ScanState::Scanning {
                pacing: Pacing::FreeRunning,
                ..
            }
        );
        match plan {
            SlotPlan::MeasurePoint {
                rotate_steps,
                layer,
                slot,
                angle_deg,
            } => {
                self.rotation
                    .step(Direction::Forward, u32::from(rotate_steps))
                    .map_err(ScannerError::Motion)?;
                if free_running {
                    self.delay.delay_ms(u32::from(self.seq.params().scan_delay_ms));
                }
                // sampling settle
                self.delay.delay_ms(20);
                let distance_cm = self.read_distance_cm();
                send(
                    tx,
                    &Response::Point(PointRecord {
                        layer,
                        step: slot,
                        distance_cm,
                        angle_deg,
                    }),
                )?;
            }
            SlotPlan::NextLayer {
                lift_steps,
                direction,
                ..
            } => {
                self.lift
                    .step(lift_direction(direction), u32::from(lift_steps))
                    .map_err(ScannerError::Motion)?;
                if free_running {
                    self.delay.delay_ms(100);
                }
                send(tx, &Response::LayerMarker)?;
            }
            SlotPlan::Finished => {
                if free_running {
                    // the carriage parks at home after an unattended scan
                    self.vertical_sweep(Direction::Reverse)
                        .map_err(ScannerError::Motion)?;
                }
                send(tx, &Response::ScanComplete)?;
            }
        }
        self.seq.commit(plan);
        Ok(())
    }

    /// Full vertical travel in layer-sized chunks.
    fn vertical_sweep(&mut self, direction: Direction) -> Result<(), ROT::Error> {
        let layers = self.seq.params().layers();
        let chunk = u32::from(self.seq.params().z_steps_per_layer);
        for _ in 0..layers {
            self.lift.step(direction, chunk)?;
            self.delay.delay_ms(10);
        }
        Ok(())
    }

    /// One reading in centimeters as it goes on the wire: sensor faults,
    /// zero, out-of-range and anything past [`MAX_VALID_DISTANCE_MM`] all
    /// collapse to `0.0`.
    fn read_distance_cm(&mut self) -> f32 {
        if !self.sensor_ok {
            return 0.0;
        }
        match self.sensor.read() {
            Ok(RangeReading::Valid(mm)) if mm > 0 && mm <= MAX_VALID_DISTANCE_MM => {
                f32::from(mm) / 10.0
            }
            _ => 0.0,
        }
    }

    fn is_busy(&self) -> bool {
        matches!(self.seq.state(), ScanState::Scanning { .. })
    }
}
