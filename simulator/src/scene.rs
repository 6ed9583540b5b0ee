//! Objects standing on the virtual turntable.
//!
//! Everything is a solid of revolution around the turntable axis, described
//! by its surface radius as a function of the table angle and the carriage
//! height. That is exactly the quantity the range sensor measures against.

use serde::Deserialize;

/// A single object on the table. Radii are in centimeters to match the
/// wire protocol, heights in millimeters to match the lift axis.
#[derive(Clone, Copy, Debug, Deserialize)]
pub enum Shape {
    Cylinder {
        radius_cm: f32,
        height_mm: f32,
        #[serde(default)]
        base_mm: f32,
    },
    /// Linear taper from `base_radius_cm` to `top_radius_cm`.
    Cone {
        base_radius_cm: f32,
        top_radius_cm: f32,
        height_mm: f32,
        #[serde(default)]
        base_mm: f32,
    },
    /// Regular prism, handy because its faces are NOT rotationally
    /// symmetric so the reported angles actually matter.
    Prism {
        sides: u32,
        circumradius_cm: f32,
        height_mm: f32,
        #[serde(default)]
        base_mm: f32,
        /// Angle of the first vertex.
        #[serde(default)]
        rotation_deg: f32,
    },
}

impl Shape {
    /// Surface radius at the given table angle and height, `None` when the
    /// shape does not reach that height.
    pub fn radius_at(&self, theta_rad: f32, z_mm: f32) -> Option<f32> {
        match *self {
            Shape::Cylinder {
                radius_cm,
                height_mm,
                base_mm,
            } => relative_height(z_mm, base_mm, height_mm).map(|_| radius_cm),
            Shape::Cone {
                base_radius_cm,
                top_radius_cm,
                height_mm,
                base_mm,
            } => relative_height(z_mm, base_mm, height_mm)
                .map(|t| base_radius_cm + (top_radius_cm - base_radius_cm) * t),
            Shape::Prism {
                sides,
                circumradius_cm,
                height_mm,
                base_mm,
                rotation_deg,
            } => relative_height(z_mm, base_mm, height_mm)
                .map(|_| prism_radius(sides, circumradius_cm, theta_rad - rotation_deg.to_radians())),
        }
    }
}

/// Height inside the shape normalized to `0..=1`, `None` outside.
fn relative_height(z_mm: f32, base_mm: f32, height_mm: f32) -> Option<f32> {
    let t = (z_mm - base_mm) / height_mm;
    (0.0..=1.0).contains(&t).then_some(t)
}

/// Polar radius of a regular polygon with a vertex at angle zero.
fn prism_radius(sides: u32, circumradius_cm: f32, theta_rad: f32) -> f32 {
    let sector = std::f32::consts::TAU / sides as f32;
    let half = sector / 2.0;
    let within = theta_rad.rem_euclid(sector);
    // apothem over the cosine of the angle off the face normal
    circumradius_cm * half.cos() / (within - half).cos()
}

/// The collection of shapes the sensor ranges against.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    shapes: Vec<Shape>,
}

impl Scene {
    pub fn new(shapes: Vec<Shape>) -> Self {
        Self { shapes }
    }

    /// Radius of the closest surface seen from outside, which on a rig
    /// looking inward is the largest radius of any shape at that height.
    pub fn radius_at(&self, theta_rad: f32, z_mm: f32) -> Option<f32> {
        self.shapes
            .iter()
            .filter_map(|shape| shape.radius_at(theta_rad, z_mm))
            .reduce(f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn a_cylinder_is_the_same_from_every_angle() {
        let shape = Shape::Cylinder {
            radius_cm: 5.0,
            height_mm: 40.0,
            base_mm: 10.0,
        };

        for theta in [0.0, 1.0, PI, 5.0] {
            assert_eq!(shape.radius_at(theta, 30.0), Some(5.0));
        }
        assert_eq!(shape.radius_at(0.0, 10.0), Some(5.0));
        assert_eq!(shape.radius_at(0.0, 50.0), Some(5.0));
        assert_eq!(shape.radius_at(0.0, 9.9), None);
        assert_eq!(shape.radius_at(0.0, 50.1), None);
    }

    #[test]
    fn a_cone_tapers_linearly_with_height() {
        let shape = Shape::Cone {
            base_radius_cm: 6.0,
            top_radius_cm: 2.0,
            height_mm: 8.0,
            base_mm: 0.0,
        };

        assert_relative_eq!(shape.radius_at(0.0, 0.0).unwrap(), 6.0);
        assert_relative_eq!(shape.radius_at(0.0, 4.0).unwrap(), 4.0);
        assert_relative_eq!(shape.radius_at(0.0, 8.0).unwrap(), 2.0);
        assert_eq!(shape.radius_at(0.0, 9.0), None);
    }

    #[test]
    fn prism_faces_bow_in_towards_the_apothem() {
        let square = Shape::Prism {
            sides: 4,
            circumradius_cm: 10.0,
            height_mm: 20.0,
            base_mm: 0.0,
            rotation_deg: 0.0,
        };

        // full radius at the vertices, apothem at the face centers
        assert_relative_eq!(square.radius_at(0.0, 5.0).unwrap(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(
            square.radius_at(FRAC_PI_2, 5.0).unwrap(),
            10.0,
            epsilon = 1e-4
        );
        assert_relative_eq!(
            square.radius_at(FRAC_PI_2 / 2.0, 5.0).unwrap(),
            10.0 / std::f32::consts::SQRT_2,
            epsilon = 1e-3
        );
    }

    #[test]
    fn a_rotated_prism_moves_its_vertices() {
        let rotated = Shape::Prism {
            sides: 4,
            circumradius_cm: 10.0,
            height_mm: 20.0,
            base_mm: 0.0,
            rotation_deg: 45.0,
        };

        // what used to be a face center is now a vertex
        assert_relative_eq!(
            rotated.radius_at(45f32.to_radians(), 5.0).unwrap(),
            10.0,
            epsilon = 1e-4
        );
        assert_relative_eq!(
            rotated.radius_at(0.0, 5.0).unwrap(),
            10.0 * 45f32.to_radians().cos(),
            epsilon = 1e-4
        );
    }

    #[test]
    fn the_nearest_surface_masks_the_ones_behind_it() {
        let scene = Scene::new(vec![
            Shape::Cylinder {
                radius_cm: 3.0,
                height_mm: 30.0,
                base_mm: 0.0,
            },
            Shape::Cylinder {
                radius_cm: 5.0,
                height_mm: 10.0,
                base_mm: 0.0,
            },
        ]);

        assert_eq!(scene.radius_at(0.0, 5.0), Some(5.0));
        assert_eq!(scene.radius_at(0.0, 20.0), Some(3.0));
        assert_eq!(scene.radius_at(0.0, 40.0), None);
        assert_eq!(Scene::default().radius_at(0.0, 0.0), None);
    }
}
