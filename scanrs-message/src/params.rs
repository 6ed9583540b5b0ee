use serde::{Deserialize, Serialize};

pub const SERIAL_BAUD: u32 = 115_200;

pub const MIN_THETA_STEPS_PER_REV: u16 = 4;
pub const MAX_THETA_STEPS_PER_REV: u16 = 3600;

/// The seven parameters that define one scan. Travels over the wire in
/// `CONFIG` / `CURRENT_CONFIG` lines and is persisted by the firmware.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// Measurement slots per turntable revolution.
    pub theta_steps_per_rev: u16,
    /// Total vertical travel of the sensor carriage.
    pub z_travel_mm: u16,
    /// Lift motor steps per millimeter of carriage travel.
    pub z_steps_per_mm: u16,
    /// Lift motor steps between two layers.
    pub z_steps_per_layer: u16,
    /// Settling delay before each measurement in free-running mode.
    pub scan_delay_ms: u16,
    /// Distance from the sensor to the rotation axis.
    pub center_distance_cm: f32,
    /// Turntable motor (micro)steps per revolution.
    pub steps_per_rev: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            theta_steps_per_rev: 200,
            z_travel_mm: 200,
            z_steps_per_mm: 200,
            z_steps_per_layer: 400,
            scan_delay_ms: 50,
            center_distance_cm: 15.0,
            steps_per_rev: 1600,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("theta_steps must be between {MIN_THETA_STEPS_PER_REV} and {MAX_THETA_STEPS_PER_REV}")]
    ThetaOutOfRange,
    #[error("theta_steps ({theta}) cannot exceed steps_per_rev ({steps_per_rev})")]
    ThetaExceedsStepsPerRev { theta: u16, steps_per_rev: u16 },
    #[error("travel, step and distance parameters must be positive")]
    NonPositive,
    #[error("no full layer fits the configured travel")]
    NoLayers,
}

impl ScanParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if !(MIN_THETA_STEPS_PER_REV..=MAX_THETA_STEPS_PER_REV).contains(&self.theta_steps_per_rev)
        {
            return Err(ParamError::ThetaOutOfRange);
        }
        if self.theta_steps_per_rev > self.steps_per_rev {
            return Err(ParamError::ThetaExceedsStepsPerRev {
                theta: self.theta_steps_per_rev,
                steps_per_rev: self.steps_per_rev,
            });
        }
        if self.z_travel_mm == 0
            || self.z_steps_per_mm == 0
            || self.z_steps_per_layer == 0
            || !(self.center_distance_cm > 0.0)
        {
            return Err(ParamError::NonPositive);
        }
        if self.layers() == 0 {
            return Err(ParamError::NoLayers);
        }
        Ok(())
    }

    /// Number of layers the configured travel allows (integer division, the
    /// leftover travel is not scanned).
    pub fn layers(&self) -> u32 {
        if self.z_steps_per_layer == 0 {
            return 0;
        }
        u32::from(self.z_travel_mm) * u32::from(self.z_steps_per_mm)
            / u32::from(self.z_steps_per_layer)
    }

    /// Whole turntable steps between two measurement slots.
    pub fn steps_per_point(&self) -> u16 {
        if self.theta_steps_per_rev == 0 {
            return 0;
        }
        self.steps_per_rev / self.theta_steps_per_rev
    }

    /// Steps left over by the integer division in [`steps_per_point`]; the
    /// first `steps_remainder` slots of each layer absorb one extra step so
    /// a layer comes out to exactly one revolution.
    ///
    /// [`steps_per_point`]: Self::steps_per_point
    pub fn steps_remainder(&self) -> u16 {
        if self.theta_steps_per_rev == 0 {
            return 0;
        }
        self.steps_per_rev % self.theta_steps_per_rev
    }

    /// Turntable steps to move when advancing into `slot`.
    pub fn steps_for_slot(&self, slot: u16) -> u16 {
        let base = self.steps_per_point();
        if slot < self.steps_remainder() {
            base + 1
        } else {
            base
        }
    }

    pub fn angle_per_slot_deg(&self) -> f32 {
        360.0 / f32::from(self.theta_steps_per_rev)
    }

    /// Angle reported for a measurement taken at `slot`. The measurement
    /// happens after rotating into the slot, hence the +1.
    pub fn slot_angle_deg(&self, slot: u16) -> f32 {
        if self.theta_steps_per_rev == 0 {
            return 0.0;
        }
        f32::from((slot + 1) % self.theta_steps_per_rev) * self.angle_per_slot_deg()
    }

    /// Vertical distance between two layers.
    pub fn layer_height_mm(&self) -> f32 {
        if self.z_steps_per_mm == 0 {
            return 0.0;
        }
        f32::from(self.z_steps_per_layer) / f32::from(self.z_steps_per_mm)
    }
}
