use common::{rig::RigGeometry, scan::CloudPoint};
use scanrs_message::{PointRecord, ScanParams};

/// Turns raw polar measurements into cartesian cloud points.
///
/// A reading is the distance from the sensor to whatever surface it hit, so
/// the disk radius of the hit is `center - distance`, which comes out negative
/// for surfaces just past the axis. Readings of zero mark sensor dropouts and
/// readings outside the disk are background, both are discarded.
pub struct Projector {
    geometry: RigGeometry,
}

impl Projector {
    pub fn new(geometry: RigGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &RigGeometry {
        &self.geometry
    }

    /// Folds the configuration reported by the device into the projection.
    pub fn apply_params(&mut self, params: &ScanParams) {
        self.geometry.apply_params(params);
    }

    pub fn project(&self, record: &PointRecord) -> Option<CloudPoint> {
        let distance = record.distance_cm;
        if distance <= 0.0 {
            return None;
        }
        if distance < self.geometry.min_distance_cm() || distance > self.geometry.max_distance_cm()
        {
            return None;
        }

        let radius_cm = self.geometry.center_distance_cm - distance;
        let angle = record.angle_deg.to_radians();

        Some(CloudPoint {
            x_mm: radius_cm * angle.cos() * 10.0,
            y_mm: radius_cm * angle.sin() * 10.0,
            z_mm: record.layer as f32 * self.geometry.layer_height_mm,
            layer: record.layer,
            angle_deg: record.angle_deg,
        })
    }
}
