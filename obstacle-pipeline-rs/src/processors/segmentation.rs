//! RANSAC ground plane segmentation.
//!
//! Repeatedly fits a plane through three randomly drawn points and keeps the
//! plane supported by the most points within `distance_threshold`. The random
//! source is a [`StdRng`] seeded by the caller, so a given cloud, parameter set
//! and seed always produce the same partition.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::error::{ProcessingError, Result};
use crate::config::SegmentationConfig;
use crate::core::loaders::PointCloud;

/// Minimum number of points needed to define a plane.
pub const MIN_POINTS: usize = 3;

/// Samples whose edge cross product is shorter than this are collinear.
const DEGENERATE_EPSILON: f32 = 1e-6;

/// Below this size inliers are counted sequentially.
const PARALLEL_THRESHOLD: usize = 4096;

/// Plane `a*x + b*y + c*z + d = 0` with `(a, b, c)` of unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneModel {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    /// Threshold the inlier set was computed with.
    pub distance_threshold: f32,
}

impl PlaneModel {
    /// Plane through three points, or `None` when they are collinear.
    pub fn through(p1: [f32; 3], p2: [f32; 3], p3: [f32; 3], distance_threshold: f32) -> Option<Self> {
        let u = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
        let v = [p3[0] - p1[0], p3[1] - p1[1], p3[2] - p1[2]];
        let n = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        let norm = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if !(norm > DEGENERATE_EPSILON) {
            return None;
        }

        let (a, b, c) = (n[0] / norm, n[1] / norm, n[2] / norm);
        let d = -(a * p1[0] + b * p1[1] + c * p1[2]);
        Some(Self {
            a,
            b,
            c,
            d,
            distance_threshold,
        })
    }

    /// Unit normal `(a, b, c)`.
    #[inline]
    pub fn normal(&self) -> [f32; 3] {
        [self.a, self.b, self.c]
    }

    /// Perpendicular distance from `p` to the plane.
    #[inline]
    pub fn distance(&self, p: [f32; 3]) -> f32 {
        (self.a * p[0] + self.b * p[1] + self.c * p[2] + self.d).abs()
    }

    #[inline]
    fn is_inlier(&self, p: [f32; 3]) -> bool {
        self.distance(p) <= self.distance_threshold
    }
}

/// Ground/obstacle partition of a cloud.
///
/// `ground` and `obstacles` are ascending, disjoint and together list every
/// index of the segmented cloud exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSegmentation {
    pub model: PlaneModel,
    pub ground: Vec<usize>,
    pub obstacles: Vec<usize>,
    /// RANSAC iterations actually run.
    pub iterations: usize,
    /// The loop stopped early because the deadline passed.
    pub timed_out: bool,
}

impl PlaneSegmentation {
    /// Number of points in the segmented cloud.
    pub fn len(&self) -> usize {
        self.ground.len() + self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of the cloud lying on the plane.
    pub fn inlier_ratio(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.ground.len() as f32 / self.len() as f32
        }
    }

    /// True when the plane is supported by less than `min_ratio` of the cloud.
    pub fn is_low_confidence(&self, min_ratio: f32) -> bool {
        self.inlier_ratio() < min_ratio
    }
}

/// Fit the dominant plane of `cloud` and split it into ground and obstacles.
///
/// # Errors
///
/// * [`ProcessingError::InsufficientData`] for fewer than 3 points.
/// * [`ProcessingError::Config`] for `max_iterations == 0` or a negative or
///   non-finite threshold.
/// * [`ProcessingError::NoPlaneFound`] when every sampled triple was collinear.
pub fn segment_plane(
    cloud: &PointCloud,
    max_iterations: usize,
    distance_threshold: f32,
    seed: u64,
) -> Result<PlaneSegmentation> {
    segment_plane_with_deadline(cloud, max_iterations, distance_threshold, seed, None)
}

/// [`segment_plane`] that stops sampling once `deadline` has passed.
///
/// The deadline only applies once a non-degenerate model has been found, so
/// a frame is never failed for lack of time. Sampling stays bounded by
/// `max_iterations`. When the deadline cuts the loop short the best model
/// found so far is used and `timed_out` is set.
pub fn segment_plane_with_deadline(
    cloud: &PointCloud,
    max_iterations: usize,
    distance_threshold: f32,
    seed: u64,
    deadline: Option<Instant>,
) -> Result<PlaneSegmentation> {
    let n = cloud.len();
    if n < MIN_POINTS {
        return Err(ProcessingError::InsufficientData {
            points: n,
            required: MIN_POINTS,
        });
    }
    if max_iterations == 0 {
        return Err(ProcessingError::Config(
            "RANSAC max_iterations must be at least 1".to_string(),
        ));
    }
    if !distance_threshold.is_finite() || distance_threshold < 0.0 {
        return Err(ProcessingError::Config(format!(
            "RANSAC distance threshold must be non-negative and finite, got {}",
            distance_threshold
        )));
    }

    let coords = cloud.to_coords();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Option<(PlaneModel, usize)> = None;
    let mut iterations = 0;
    let mut timed_out = false;

    while iterations < max_iterations {
        if best.is_some() && deadline.map_or(false, |d| Instant::now() >= d) {
            timed_out = true;
            break;
        }
        iterations += 1;

        let sample = rand::seq::index::sample(&mut rng, n, 3);
        let Some(model) = PlaneModel::through(
            coords[sample.index(0)],
            coords[sample.index(1)],
            coords[sample.index(2)],
            distance_threshold,
        ) else {
            continue;
        };

        let count = count_inliers(&coords, &model);
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((model, count));
        }
    }

    let Some((model, _)) = best else {
        return Err(ProcessingError::NoPlaneFound { iterations });
    };

    let mut ground = Vec::new();
    let mut obstacles = Vec::new();
    for (i, &p) in coords.iter().enumerate() {
        if model.is_inlier(p) {
            ground.push(i);
        } else {
            obstacles.push(i);
        }
    }

    if timed_out {
        log::debug!("segment_plane: deadline reached after {} iterations", iterations);
    }
    log::debug!(
        "segment_plane: {} ground / {} obstacle points, normal=({:.3}, {:.3}, {:.3})",
        ground.len(),
        obstacles.len(),
        model.a,
        model.b,
        model.c
    );

    Ok(PlaneSegmentation {
        model,
        ground,
        obstacles,
        iterations,
        timed_out,
    })
}

/// [`segment_plane_with_deadline`] driven by a [`SegmentationConfig`].
pub fn segment_with_config(
    cloud: &PointCloud,
    config: &SegmentationConfig,
    deadline: Option<Instant>,
) -> Result<PlaneSegmentation> {
    segment_plane_with_deadline(
        cloud,
        config.max_iterations,
        config.distance_threshold,
        config.seed,
        deadline,
    )
}

fn count_inliers(coords: &[[f32; 3]], model: &PlaneModel) -> usize {
    if coords.len() < PARALLEL_THRESHOLD {
        coords.iter().filter(|&&p| model.is_inlier(p)).count()
    } else {
        coords.par_iter().filter(|&&p| model.is_inlier(p)).count()
    }
}
