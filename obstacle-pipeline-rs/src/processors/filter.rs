//! Cloud filter: voxel grid downsampling, region-of-interest crop and removal
//! of returns from the ego vehicle.
//!
//! The full filter runs the three steps in a fixed order: downsample first,
//! then crop and self-filter in a single pass over the downsampled points.
//!
//! # Example
//!
//! ```
//! use obstacle_pipeline::core::loaders::PointCloud;
//! use obstacle_pipeline::processors::filter::filter_cloud;
//!
//! let cloud = PointCloud::from_positions(&[[0.1, 0.1, 0.0], [0.15, 0.1, 0.0], [5.0, 0.0, 0.0]]);
//! let filtered = filter_cloud(&cloud, 0.5, [-1.0, -1.0, -1.0], [10.0, 1.0, 1.0], None).unwrap();
//! assert_eq!(filtered.len(), 2);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::{check_box, ProcessingError, Result};
use crate::config::FilterConfig;
use crate::core::loaders::PointCloud;
use crate::core::transforms::compute_bounds;

/// Where the voxel grid is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelAnchor {
    /// Cells are aligned to the world origin: `floor(p / voxel)`.
    ///
    /// Filtering an already filtered cloud is a no-op with this anchor.
    #[default]
    Origin,
    /// Cells start at the cloud's minimum corner.
    ///
    /// A voxel larger than the cloud's extent always collapses it to one point.
    CloudMin,
}

/// Running sums for one occupied voxel.
#[derive(Debug, Default, Clone, Copy)]
struct VoxelSum {
    x: f64,
    y: f64,
    z: f64,
    intensity: f64,
    count: u32,
}

/// Voxel grid downsample: every occupied cube of edge `voxel_size` is replaced
/// by the centroid of its points (intensity is averaged too).
///
/// Output points appear in the order their voxel was first occupied, so the
/// result is fully determined by the input cloud, voxel size and anchor.
/// Points with non-finite coordinates are dropped.
///
/// # Errors
///
/// [`ProcessingError::Config`] unless `voxel_size` is finite and positive.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32, anchor: VoxelAnchor) -> Result<PointCloud> {
    check_voxel_size(voxel_size)?;

    let origin = match anchor {
        VoxelAnchor::Origin => [0.0f64; 3],
        VoxelAnchor::CloudMin => compute_bounds(cloud)
            .map(|(min, _)| [min[0] as f64, min[1] as f64, min[2] as f64])
            .unwrap_or([0.0; 3]),
    };
    let inv = 1.0 / voxel_size as f64;
    let cell = |v: f32, axis: usize| ((v as f64 - origin[axis]) * inv).floor() as i64;

    let mut slots: HashMap<[i64; 3], usize> = HashMap::new();
    let mut sums: Vec<VoxelSum> = Vec::new();

    for i in 0..cloud.len() {
        let p = cloud.position(i);
        if !p.iter().all(|v| v.is_finite()) {
            continue;
        }

        let key = [cell(p[0], 0), cell(p[1], 1), cell(p[2], 2)];
        let slot = *slots.entry(key).or_insert_with(|| {
            sums.push(VoxelSum::default());
            sums.len() - 1
        });

        let sum = &mut sums[slot];
        sum.x += p[0] as f64;
        sum.y += p[1] as f64;
        sum.z += p[2] as f64;
        if let Some(ref intensity) = cloud.intensity {
            sum.intensity += intensity[i] as f64;
        }
        sum.count += 1;
    }

    let mut out = PointCloud::with_capacity(sums.len());
    for sum in &sums {
        let inv_count = 1.0 / sum.count as f64;
        let (x, y, z) = (
            (sum.x * inv_count) as f32,
            (sum.y * inv_count) as f32,
            (sum.z * inv_count) as f32,
        );
        if cloud.has_intensity() {
            out.push_with_intensity(x, y, z, (sum.intensity * inv_count) as f32);
        } else {
            out.push(x, y, z);
        }
    }

    log::debug!(
        "voxel_downsample: {} -> {} points (voxel={})",
        cloud.len(),
        out.len(),
        voxel_size
    );
    Ok(out)
}

/// Keep only points inside `[min, max]` (inclusive on every axis).
///
/// # Errors
///
/// [`ProcessingError::Config`] if `min > max` on any axis.
pub fn crop_region(cloud: &PointCloud, min: [f32; 3], max: [f32; 3]) -> Result<PointCloud> {
    check_box("region", min, max)?;
    Ok(retain(cloud, |p| inside(p, min, max)))
}

/// Drop points inside `[min, max]` (inclusive on every axis).
///
/// Used to remove returns that hit the sensing vehicle itself.
///
/// # Errors
///
/// [`ProcessingError::Config`] if `min > max` on any axis.
pub fn remove_box(cloud: &PointCloud, min: [f32; 3], max: [f32; 3]) -> Result<PointCloud> {
    check_box("self-filter box", min, max)?;
    Ok(retain(cloud, |p| !inside(p, min, max)))
}

/// Downsample, crop to the region of interest and remove ego-vehicle returns.
///
/// The voxel grid is anchored at the world origin. `self_box` is an optional
/// `(min, max)` box whose points are discarded after cropping.
///
/// # Errors
///
/// [`ProcessingError::Config`] for a non-positive voxel size or inverted
/// region / self-filter bounds. An empty input is not an error.
pub fn filter_cloud(
    cloud: &PointCloud,
    voxel_size: f32,
    region_min: [f32; 3],
    region_max: [f32; 3],
    self_box: Option<([f32; 3], [f32; 3])>,
) -> Result<PointCloud> {
    filter_anchored(cloud, voxel_size, VoxelAnchor::Origin, region_min, region_max, self_box)
}

/// [`filter_cloud`] driven by a [`FilterConfig`].
pub fn filter_with_config(cloud: &PointCloud, config: &FilterConfig) -> Result<PointCloud> {
    let self_box = config.self_filter.as_ref().map(|b| (b.min, b.max));
    filter_anchored(
        cloud,
        config.voxel_size,
        config.anchor,
        config.region_min,
        config.region_max,
        self_box,
    )
}

fn filter_anchored(
    cloud: &PointCloud,
    voxel_size: f32,
    anchor: VoxelAnchor,
    region_min: [f32; 3],
    region_max: [f32; 3],
    self_box: Option<([f32; 3], [f32; 3])>,
) -> Result<PointCloud> {
    check_voxel_size(voxel_size)?;
    check_box("region", region_min, region_max)?;
    if let Some((min, max)) = self_box {
        check_box("self-filter box", min, max)?;
    }

    let downsampled = voxel_downsample(cloud, voxel_size, anchor)?;

    let filtered = retain(&downsampled, |p| {
        inside(p, region_min, region_max)
            && !self_box.map_or(false, |(min, max)| inside(p, min, max))
    });

    log::debug!(
        "filter_cloud: {} raw -> {} voxels -> {} kept",
        cloud.len(),
        downsampled.len(),
        filtered.len()
    );
    Ok(filtered)
}

fn check_voxel_size(voxel_size: f32) -> Result<()> {
    if voxel_size.is_finite() && voxel_size > 0.0 {
        Ok(())
    } else {
        Err(ProcessingError::Config(format!(
            "voxel size must be positive and finite, got {}",
            voxel_size
        )))
    }
}

#[inline]
fn inside(p: [f32; 3], min: [f32; 3], max: [f32; 3]) -> bool {
    (0..3).all(|axis| p[axis] >= min[axis] && p[axis] <= max[axis])
}

/// Copy the points for which `keep` holds, preserving order and intensity.
fn retain<F: Fn([f32; 3]) -> bool>(cloud: &PointCloud, keep: F) -> PointCloud {
    let mut out = PointCloud::with_capacity(cloud.len());
    for point in cloud.points() {
        if keep(point.position()) {
            out.push_point(point);
        }
    }
    if cloud.has_intensity() && out.intensity.is_none() {
        out.intensity = Some(Vec::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cloud = PointCloud::with_capacity(n);
        for _ in 0..n {
            cloud.push_with_intensity(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(0.0..1.0),
            );
        }
        cloud
    }

    #[test]
    fn test_voxel_downsample_centroid() {
        let mut cloud = PointCloud::new();
        cloud.push_with_intensity(0.1, 0.1, 0.1, 1.0);
        cloud.push_with_intensity(0.3, 0.3, 0.3, 3.0);
        cloud.push_with_intensity(1.5, 0.1, 0.1, 5.0);

        let out = voxel_downsample(&cloud, 1.0, VoxelAnchor::Origin).unwrap();

        assert_eq!(out.len(), 2);
        assert!((out.x[0] - 0.2).abs() < 1e-6);
        assert!((out.z[0] - 0.2).abs() < 1e-6);
        assert_eq!(out.intensity.as_ref().unwrap()[0], 2.0);
        assert_eq!(out.position(1), [1.5, 0.1, 0.1]);
    }

    #[test]
    fn test_voxel_downsample_rejects_bad_size() {
        let cloud = random_cloud(10, 1);
        for size in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                voxel_downsample(&cloud, size, VoxelAnchor::Origin),
                Err(ProcessingError::Config(_))
            ));
        }
    }

    #[test]
    fn test_filter_empty_input() {
        let out = filter_cloud(&PointCloud::new(), 0.3, [-1.0; 3], [1.0; 3], None).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_filter_rejects_inverted_region() {
        let cloud = random_cloud(10, 2);
        let err = filter_cloud(&cloud, 0.3, [1.0, 0.0, 0.0], [0.0, 1.0, 1.0], None).unwrap_err();
        assert!(matches!(err, ProcessingError::Config(_)));

        let err = filter_cloud(
            &cloud,
            0.3,
            [-10.0; 3],
            [10.0; 3],
            Some(([0.0, 0.0, 1.0], [1.0, 1.0, 0.0])),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::Config(_)));
    }

    #[test]
    fn test_crop_is_inclusive() {
        let cloud = PointCloud::from_positions(&[[1.0, 1.0, 1.0], [1.0001, 0.0, 0.0], [-1.0, -1.0, -1.0]]);
        let out = crop_region(&cloud, [-1.0; 3], [1.0; 3]).unwrap();
        assert_eq!(out.to_coords(), vec![[1.0, 1.0, 1.0], [-1.0, -1.0, -1.0]]);
    }

    #[test]
    fn test_remove_box_drops_roof_points() {
        let cloud = PointCloud::from_positions(&[[0.0, 0.0, -0.5], [5.0, 0.0, -0.5], [0.0, 0.0, 0.5]]);
        let out = remove_box(&cloud, [-1.5, -1.7, -1.0], [2.6, 1.7, -0.4]).unwrap();
        assert_eq!(out.to_coords(), vec![[5.0, 0.0, -0.5], [0.0, 0.0, 0.5]]);
    }

    #[test]
    fn test_filter_crop_and_self_filter() {
        let cloud = PointCloud::from_positions(&[
            [0.0, 0.0, -0.5],  // roof
            [10.0, 2.0, -1.0], // kept
            [40.0, 0.0, 0.0],  // outside region
            [-5.0, -4.0, 0.5], // kept
        ]);

        let out = filter_cloud(
            &cloud,
            0.1,
            [-10.0, -5.0, -2.0],
            [30.0, 8.0, 1.0],
            Some(([-1.5, -1.7, -1.0], [2.6, 1.7, -0.4])),
        )
        .unwrap();

        assert_eq!(out.len(), 2);
        assert!((out.x[0] - 10.0).abs() < 1e-5);
        assert!((out.x[1] + 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let cloud = random_cloud(5000, 7);
        let (min, max) = ([-8.0, -8.0, -1.5], [8.0, 8.0, 1.5]);

        let once = filter_cloud(&cloud, 0.5, min, max, None).unwrap();
        let twice = filter_cloud(&once, 0.5, min, max, None).unwrap();

        assert!(once.len() < cloud.len());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_large_voxel_collapses_to_one_point() {
        // Straddles the world origin, so only the cloud-anchored grid collapses it.
        let cloud = PointCloud::from_positions(&[[-0.5, -0.2, 0.0], [0.4, 0.3, 0.1], [0.0, 0.0, -0.1]]);

        let out = voxel_downsample(&cloud, 2.0, VoxelAnchor::CloudMin).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out.x[0] + 0.1 / 3.0).abs() < 1e-6);
        assert!((out.y[0] - 0.1 / 3.0).abs() < 1e-6);

        let same_cell = PointCloud::from_positions(&[[0.1, 0.1, 0.1], [0.9, 0.5, 0.2]]);
        let out = voxel_downsample(&same_cell, 5.0, VoxelAnchor::Origin).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_filter_with_config_uses_anchor() {
        let cloud = PointCloud::from_positions(&[[-0.5, -0.2, 0.0], [0.4, 0.3, 0.1], [0.0, 0.0, -0.1]]);
        let yaml = "voxel_size: 2.0\nanchor: cloud_min\nregion_min: [-10.0, -10.0, -10.0]\nregion_max: [10.0, 10.0, 10.0]\nself_filter: null\n";
        let mut config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.anchor, VoxelAnchor::CloudMin);

        let out = filter_with_config(&cloud, &config).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out.x[0] + 0.1 / 3.0).abs() < 1e-6);

        config.anchor = VoxelAnchor::Origin;
        assert!(filter_with_config(&cloud, &config).unwrap().len() > 1);
    }

    #[test]
    fn test_non_finite_points_dropped() {
        let cloud = PointCloud::from_positions(&[[f32::NAN, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let out = voxel_downsample(&cloud, 0.5, VoxelAnchor::Origin).unwrap();
        assert_eq!(out.len(), 1);
    }
}
