use core::fmt;

use crate::params::ScanParams;
use crate::ParseError;

/// One measured point as it appears on the wire:
/// `<layer>,<slot>,<distance cm>,<angle deg>` with two decimals for the
/// distance and one for the angle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointRecord {
    pub layer: u32,
    pub step: u16,
    pub distance_cm: f32,
    pub angle_deg: f32,
}

impl fmt::Display for PointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{:.2},{:.1}",
            self.layer, self.step, self.distance_cm, self.angle_deg
        )
    }
}

/// The bare line separating two layers in the point stream. Points always
/// have four fields, so the token cannot collide with a record.
const LAYER_DELIMITER: &str = "9999";

/// One device -> host line. Free-text payloads (`Info`, the error variants)
/// borrow from the received line.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Response<'a> {
    /// Boot banner.
    Ready,
    ScanStart,
    ScanPaused,
    ScanResumed,
    ScanComplete,
    HomeComplete,
    MoveToTopComplete,
    /// Signed step count the turntable actually jogged.
    Rotated(i32),
    RotatedLift(i32),
    ConfigOk(ScanParams),
    CurrentConfig(ScanParams),
    /// Reply to `READ_LIDAR`, centimeters.
    Distance(f32),
    /// Reply to `TEST`, human readable.
    TestDistance(f32),
    /// Reply to `TEST_POINT`.
    TestPoint { angle_deg: f32, distance_cm: f32 },
    Point(PointRecord),
    LayerMarker,
    /// `SCAN_INFO:` diagnostics.
    Info(&'a str),
    ConfigError(&'a str),
    RotateError(&'a str),
    RotateLiftError(&'a str),
    Error(&'a str),
}

impl<'a> Response<'a> {
    /// Parses one received line. Lines that are none of the known shapes
    /// come back as [`ParseError::Unrecognized`]; the host treats those as
    /// raw log text rather than a protocol violation.
    pub fn parse(line: &'a str) -> Result<Response<'a>, ParseError<'a>> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        match line {
            "3D Scanner Ready" => return Ok(Response::Ready),
            "SCAN_START" => return Ok(Response::ScanStart),
            "SCAN_PAUSED" => return Ok(Response::ScanPaused),
            "SCAN_RESUMED" => return Ok(Response::ScanResumed),
            "SCAN_COMPLETE" => return Ok(Response::ScanComplete),
            "HOME_COMPLETE" => return Ok(Response::HomeComplete),
            "MOVE_TO_TOP_COMPLETE" => return Ok(Response::MoveToTopComplete),
            LAYER_DELIMITER => return Ok(Response::LayerMarker),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("ROTATED_Z:") {
            let steps = rest.trim().parse().map_err(|_| ParseError::InvalidNumber)?;
            return Ok(Response::RotatedLift(steps));
        }
        if let Some(rest) = line.strip_prefix("ROTATED:") {
            let steps = rest.trim().parse().map_err(|_| ParseError::InvalidNumber)?;
            return Ok(Response::Rotated(steps));
        }
        if let Some(rest) = line.strip_prefix("CONFIG_OK:") {
            let params = parse_config_ok(rest).ok_or(ParseError::InvalidNumber)?;
            return Ok(Response::ConfigOk(params));
        }
        if let Some(rest) = line.strip_prefix("CURRENT_CONFIG:") {
            let params = parse_current_config(rest).ok_or(ParseError::InvalidNumber)?;
            return Ok(Response::CurrentConfig(params));
        }
        if let Some(rest) = line.strip_prefix("LIDAR_DISTANCE:") {
            let cm = rest.trim().parse().map_err(|_| ParseError::InvalidNumber)?;
            return Ok(Response::Distance(cm));
        }
        if let Some(rest) = line.strip_prefix("Distance:") {
            let cm = rest.trim().parse().map_err(|_| ParseError::InvalidNumber)?;
            return Ok(Response::TestDistance(cm));
        }
        if let Some(rest) = line.strip_prefix("TEST_POINT:") {
            let (angle, distance) = rest.split_once(',').ok_or(ParseError::InvalidNumber)?;
            return Ok(Response::TestPoint {
                angle_deg: angle
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber)?,
                distance_cm: distance
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber)?,
            });
        }
        if let Some(rest) = line.strip_prefix("SCAN_INFO:") {
            return Ok(Response::Info(rest.trim_start()));
        }
        if let Some(rest) = line.strip_prefix("CONFIG_ERROR:") {
            return Ok(Response::ConfigError(rest.trim_start()));
        }
        if let Some(rest) = line.strip_prefix("ROTATE_ERROR:") {
            return Ok(Response::RotateError(rest.trim_start()));
        }
        if let Some(rest) = line.strip_prefix("ROTATE_Z_ERROR:") {
            return Ok(Response::RotateLiftError(rest.trim_start()));
        }
        if let Some(rest) = line.strip_prefix("ERROR:") {
            return Ok(Response::Error(rest.trim_start()));
        }

        if let Some(record) = parse_point(line) {
            return Ok(Response::Point(record));
        }
        Err(ParseError::Unrecognized)
    }
}

fn parse_point(line: &str) -> Option<PointRecord> {
    let mut fields = line.split(',');
    let layer = fields.next()?.trim().parse().ok()?;
    let step = fields.next()?.trim().parse().ok()?;
    let distance_cm = fields.next()?.trim().parse().ok()?;
    let angle_deg = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(PointRecord {
        layer,
        step,
        distance_cm,
        angle_deg,
    })
}

/// `CONFIG_OK:` payload is a space separated `key=value` list with unit
/// suffixes on some values.
fn parse_config_ok(payload: &str) -> Option<ScanParams> {
    let mut params = ScanParams::default();
    for token in payload.split_whitespace() {
        let (key, value) = token.split_once('=')?;
        match key {
            "theta" => params.theta_steps_per_rev = value.parse().ok()?,
            "z_travel" => params.z_travel_mm = value.strip_suffix("mm")?.parse().ok()?,
            "z_steps/mm" => params.z_steps_per_mm = value.parse().ok()?,
            "z_steps/layer" => params.z_steps_per_layer = value.parse().ok()?,
            "delay" => params.scan_delay_ms = value.strip_suffix("ms")?.parse().ok()?,
            "center" => params.center_distance_cm = value.strip_suffix("cm")?.parse().ok()?,
            "steps/rev" => params.steps_per_rev = value.parse().ok()?,
            _ => return None,
        }
    }
    Some(params)
}

/// `CURRENT_CONFIG:` payload is the seven parameters comma separated, in
/// `CONFIG` field order.
fn parse_current_config(payload: &str) -> Option<ScanParams> {
    let mut fields = payload.split(',');
    let params = ScanParams {
        theta_steps_per_rev: fields.next()?.trim().parse().ok()?,
        z_travel_mm: fields.next()?.trim().parse().ok()?,
        z_steps_per_mm: fields.next()?.trim().parse().ok()?,
        z_steps_per_layer: fields.next()?.trim().parse().ok()?,
        scan_delay_ms: fields.next()?.trim().parse().ok()?,
        center_distance_cm: fields.next()?.trim().parse().ok()?,
        steps_per_rev: fields.next()?.trim().parse().ok()?,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(params)
}

impl fmt::Display for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Response::Ready => write!(f, "3D Scanner Ready"),
            Response::ScanStart => write!(f, "SCAN_START"),
            Response::ScanPaused => write!(f, "SCAN_PAUSED"),
            Response::ScanResumed => write!(f, "SCAN_RESUMED"),
            Response::ScanComplete => write!(f, "SCAN_COMPLETE"),
            Response::HomeComplete => write!(f, "HOME_COMPLETE"),
            Response::MoveToTopComplete => write!(f, "MOVE_TO_TOP_COMPLETE"),
            Response::Rotated(steps) => write!(f, "ROTATED:{steps}"),
            Response::RotatedLift(steps) => write!(f, "ROTATED_Z:{steps}"),
            Response::ConfigOk(p) => write!(
                f,
                "CONFIG_OK: theta={} z_travel={}mm z_steps/mm={} z_steps/layer={} delay={}ms center={:.1}cm steps/rev={}",
                p.theta_steps_per_rev,
                p.z_travel_mm,
                p.z_steps_per_mm,
                p.z_steps_per_layer,
                p.scan_delay_ms,
                p.center_distance_cm,
                p.steps_per_rev
            ),
            Response::CurrentConfig(p) => write!(
                f,
                "CURRENT_CONFIG:{},{},{},{},{},{:.1},{}",
                p.theta_steps_per_rev,
                p.z_travel_mm,
                p.z_steps_per_mm,
                p.z_steps_per_layer,
                p.scan_delay_ms,
                p.center_distance_cm,
                p.steps_per_rev
            ),
            Response::Distance(cm) => write!(f, "LIDAR_DISTANCE:{cm:.2}"),
            Response::TestDistance(cm) => write!(f, "Distance: {cm:.2}"),
            Response::TestPoint {
                angle_deg,
                distance_cm,
            } => write!(f, "TEST_POINT:{angle_deg:.1},{distance_cm:.2}"),
            Response::Point(record) => record.fmt(f),
            Response::LayerMarker => f.write_str(LAYER_DELIMITER),
            Response::Info(text) => write!(f, "SCAN_INFO: {text}"),
            Response::ConfigError(text) => write!(f, "CONFIG_ERROR: {text}"),
            Response::RotateError(text) => write!(f, "ROTATE_ERROR: {text}"),
            Response::RotateLiftError(text) => write!(f, "ROTATE_Z_ERROR: {text}"),
            Response::Error(text) => write!(f, "ERROR: {text}"),
        }
    }
}
