//! Axis-aligned bounding boxes around clusters.

use super::error::{ProcessingError, Result};
use crate::core::loaders::PointCloud;

/// Axis-aligned box with `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Edge lengths along x, y and z.
    pub fn dimensions(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn volume(&self) -> f32 {
        let [dx, dy, dz] = self.dimensions();
        dx * dy * dz
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }
}

/// Tightest axis-aligned box around the points of `cloud` listed in `cluster`.
///
/// # Errors
///
/// * [`ProcessingError::EmptyResult`] for an empty cluster.
/// * [`ProcessingError::InvalidIndex`] if an index is not a point of `cloud`.
pub fn bounding_box(cloud: &PointCloud, cluster: &[usize]) -> Result<BoundingBox> {
    if cluster.is_empty() {
        return Err(ProcessingError::EmptyResult(
            "cannot bound an empty cluster".to_string(),
        ));
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for &index in cluster {
        if index >= cloud.len() {
            return Err(ProcessingError::InvalidIndex {
                index,
                len: cloud.len(),
            });
        }
        let p = cloud.position(index);
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }

    Ok(BoundingBox { min, max })
}

/// One box per cluster, in cluster order.
pub fn bounding_boxes(cloud: &PointCloud, clusters: &[Vec<usize>]) -> Result<Vec<BoundingBox>> {
    clusters.iter().map(|c| bounding_box(cloud, c)).collect()
}
