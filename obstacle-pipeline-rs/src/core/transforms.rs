//! Point cloud index selection, bounds and subsampling helpers.
//!
//! These are the small building blocks shared by the pipeline stages and the
//! plotting code. Every function borrows its input cloud and returns a new one.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::loaders::PointCloud;

/// Seed used by [`subsample_cloud`] so plots of the same cloud are stable.
const SUBSAMPLE_SEED: u64 = 12345;

/// Build a new cloud from the points at `indices`, in the given order.
///
/// Intensity is carried along when the source cloud has it.
///
/// # Panics
///
/// Panics if an index is out of bounds; callers pass indices produced by a
/// stage operating on the same cloud.
pub fn select_indices(cloud: &PointCloud, indices: &[usize]) -> PointCloud {
    let mut x = Vec::with_capacity(indices.len());
    let mut y = Vec::with_capacity(indices.len());
    let mut z = Vec::with_capacity(indices.len());

    for &idx in indices {
        x.push(cloud.x[idx]);
        y.push(cloud.y[idx]);
        z.push(cloud.z[idx]);
    }

    let intensity = cloud
        .intensity
        .as_ref()
        .map(|column| indices.iter().map(|&idx| column[idx]).collect());

    PointCloud { x, y, z, intensity }
}

/// Component-wise minimum and maximum corners of the cloud.
///
/// Returns `None` for an empty cloud.
pub fn compute_bounds(cloud: &PointCloud) -> Option<([f32; 3], [f32; 3])> {
    if cloud.is_empty() {
        return None;
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for i in 0..cloud.len() {
        let p = cloud.position(i);
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    Some((min, max))
}

/// Randomly subsample point cloud to maximum number of points.
///
/// If the cloud has fewer points than `max_points`, returns the original
/// cloud unchanged with stride factor 1. The selection is seeded, so the same
/// cloud always yields the same subset, and keeps the original point order.
///
/// # Returns
///
/// Tuple of (subsampled_cloud, stride_factor) where stride_factor is the
/// approximate reduction ratio (ceiling of n/max_points)
pub fn subsample_cloud(cloud: &PointCloud, max_points: usize) -> (PointCloud, usize) {
    let n = cloud.len();

    if n <= max_points {
        return (cloud.clone(), 1);
    }
    if max_points == 0 {
        return (PointCloud::new(), n);
    }

    let stride_factor = (n + max_points - 1) / max_points;

    let mut rng = StdRng::seed_from_u64(SUBSAMPLE_SEED);
    let mut indices = rand::seq::index::sample(&mut rng, n, max_points).into_vec();

    // Sort indices for cache-friendly access
    indices.sort_unstable();

    (select_indices(cloud, &indices), stride_factor)
}

/// Map intensity values to grayscale RGB colors.
///
/// Values are rescaled from their observed range to 0-255, so both 0..1
/// LiDAR reflectivity and 0..255 sensor counts come out usable. A constant
/// column maps to mid gray.
pub fn intensity_to_colors(values: &[f32]) -> Vec<[u8; 3]> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;

    values
        .par_iter()
        .map(|&v| {
            let level = if span > f32::EPSILON && v.is_finite() {
                ((v - lo) / span * 255.0).clamp(0.0, 255.0) as u8
            } else {
                128
            };
            [level, level, level]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_cloud(n: usize) -> PointCloud {
        PointCloud {
            x: (0..n).map(|i| i as f32).collect(),
            y: (0..n).map(|i| i as f32).collect(),
            z: (0..n).map(|i| i as f32).collect(),
            intensity: Some((0..n).map(|i| i as f32 * 0.5).collect()),
        }
    }

    #[test]
    fn test_select_indices_keeps_intensity() {
        let cloud = line_cloud(5);
        let picked = select_indices(&cloud, &[4, 1]);

        assert_eq!(picked.len(), 2);
        assert_eq!(picked.position(0), [4.0, 4.0, 4.0]);
        assert_eq!(picked.intensity, Some(vec![2.0, 0.5]));
    }

    #[test]
    fn test_compute_bounds() {
        let cloud = PointCloud::from_positions(&[[1.0, -2.0, 3.0], [-1.0, 5.0, 0.0]]);
        let (min, max) = compute_bounds(&cloud).unwrap();
        assert_eq!(min, [-1.0, -2.0, 0.0]);
        assert_eq!(max, [1.0, 5.0, 3.0]);

        assert!(compute_bounds(&PointCloud::new()).is_none());
    }

    #[test]
    fn test_intensity_to_colors() {
        let colors = intensity_to_colors(&[0.0, 0.5, 1.0]);
        assert_eq!(colors[0], [0, 0, 0]);
        assert_eq!(colors[2], [255, 255, 255]);

        let flat = intensity_to_colors(&[3.0, 3.0]);
        assert_eq!(flat, vec![[128, 128, 128]; 2]);
    }

    #[test]
    fn test_subsample_cloud_no_reduction() {
        let cloud = line_cloud(3);

        let (result, stride) = subsample_cloud(&cloud, 10);

        assert_eq!(result.len(), 3);
        assert_eq!(stride, 1);
    }

    #[test]
    fn test_subsample_cloud_with_reduction() {
        let cloud = line_cloud(100);

        let (result, stride) = subsample_cloud(&cloud, 10);

        assert_eq!(result.len(), 10);
        assert_eq!(stride, 10); // 100 / 10 = 10

        // Stable across calls and in original order
        let (again, _) = subsample_cloud(&cloud, 10);
        assert_eq!(result, again);
        assert!(result.x.windows(2).all(|w| w[0] < w[1]));
    }
}
