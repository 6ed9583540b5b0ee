use common::scan::CloudPoint;
use itertools::Itertools;
use nalgebra::{Matrix3xX, Vector3};

/// Accumulated scan output. Positions live in a `3 x N` matrix in millimeters,
/// the layer index and turntable angle of every column ride along so exports
/// and per-layer statistics can get back to the source measurement.
#[derive(Debug, Clone)]
pub struct PointCloud {
    positions: Matrix3xX<f32>,
    layers: Vec<u32>,
    angles_deg: Vec<f32>,
}

/// Point count and mean disk radius of one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSummary {
    pub layer: u32,
    pub points: usize,
    pub mean_radius_mm: f32,
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self {
            positions: Matrix3xX::zeros(0),
            layers: Vec::new(),
            angles_deg: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a batch of points, growing the position matrix once.
    pub fn extend(&mut self, points: &[CloudPoint]) {
        if points.is_empty() {
            return;
        }

        let n = self.positions.ncols();
        let grown = std::mem::replace(&mut self.positions, Matrix3xX::zeros(0))
            .insert_columns(n, points.len(), 0.0);
        self.positions = grown;

        for (i, point) in points.iter().enumerate() {
            self.positions[(0, n + i)] = point.x_mm;
            self.positions[(1, n + i)] = point.y_mm;
            self.positions[(2, n + i)] = point.z_mm;
            self.layers.push(point.layer);
            self.angles_deg.push(point.angle_deg);
        }
    }

    pub fn push(&mut self, point: CloudPoint) {
        self.extend(std::slice::from_ref(&point));
    }

    pub fn point(&self, index: usize) -> CloudPoint {
        CloudPoint {
            x_mm: self.positions[(0, index)],
            y_mm: self.positions[(1, index)],
            z_mm: self.positions[(2, index)],
            layer: self.layers[index],
            angle_deg: self.angles_deg[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = CloudPoint> + '_ {
        (0..self.len()).map(|index| self.point(index))
    }

    pub fn positions(&self) -> &Matrix3xX<f32> {
        &self.positions
    }

    /// Number of layers that produced at least one point. Points arrive in
    /// layer order, so counting runs is enough.
    pub fn layer_count(&self) -> usize {
        self.layers.iter().dedup().count()
    }

    /// Axis-aligned bounding box, `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        if self.is_empty() {
            return None;
        }

        let mut min = Vector3::repeat(f32::INFINITY);
        let mut max = Vector3::repeat(f32::NEG_INFINITY);
        for column in self.positions.column_iter() {
            for axis in 0..3 {
                min[axis] = min[axis].min(column[axis]);
                max[axis] = max[axis].max(column[axis]);
            }
        }

        Some((min, max))
    }

    /// Per-layer statistics in arrival order.
    pub fn layer_summaries(&self) -> Vec<LayerSummary> {
        let chunks = self.layers.iter().enumerate().chunk_by(|(_, layer)| **layer);

        let mut summaries = Vec::new();
        for (layer, group) in &chunks {
            summaries.push(self.summarize(layer, group.map(|(index, _)| index)));
        }
        summaries
    }

    /// Statistics for one layer, `None` if it produced no points.
    pub fn layer_summary(&self, layer: u32) -> Option<LayerSummary> {
        let indices: Vec<usize> = self.layers.iter().positions(|l| *l == layer).collect();
        if indices.is_empty() {
            return None;
        }
        Some(self.summarize(layer, indices.into_iter()))
    }

    fn summarize(&self, layer: u32, indices: impl Iterator<Item = usize>) -> LayerSummary {
        let mut points = 0usize;
        let mut radius_sum = 0.0f32;
        for index in indices {
            let x = self.positions[(0, index)];
            let y = self.positions[(1, index)];
            radius_sum += (x * x + y * y).sqrt();
            points += 1;
        }

        LayerSummary {
            layer,
            points,
            mean_radius_mm: radius_sum / points as f32,
        }
    }
}
