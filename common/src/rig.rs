use scanrs_message::ScanParams;
use serde::Deserialize;

/// Physical description of the scanning rig, used to turn polar measurements
/// into cartesian points.
///
/// Distances are in centimeters to match the wire protocol, the layer height
/// is in millimeters like the produced cloud.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RigGeometry {
    /// Distance from the range sensor to the turntable axis.
    pub center_distance_cm: f32,
    /// Radius of the turntable disk. Readings that land outside the disk are
    /// reflections or background and get discarded.
    pub disk_radius_cm: f32,
    /// Vertical distance between two consecutive layers.
    pub layer_height_mm: f32,
}

impl Default for RigGeometry {
    fn default() -> Self {
        Self {
            center_distance_cm: 15.0,
            disk_radius_cm: 10.0,
            layer_height_mm: ScanParams::default().layer_height_mm(),
        }
    }
}

impl RigGeometry {
    /// Closest reading that can still be on the disk.
    pub fn min_distance_cm(&self) -> f32 {
        self.center_distance_cm - self.disk_radius_cm
    }

    /// Farthest reading that can still be on the disk.
    pub fn max_distance_cm(&self) -> f32 {
        self.center_distance_cm + self.disk_radius_cm
    }

    /// Adopts the values the scanner reported with its configuration. The disk
    /// radius stays, the firmware does not know about it.
    pub fn apply_params(&mut self, params: &ScanParams) {
        self.center_distance_cm = params.center_distance_cm;
        self.layer_height_mm = params.layer_height_mm();
    }
}
