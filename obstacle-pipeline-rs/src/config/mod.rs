//! Configuration types for the obstacle pipeline.
//!
//! Every numeric parameter of the pipeline lives here with its default. A YAML
//! file only needs to list the values it changes; missing fields fall back to
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::processors::clustering::ClusterMethod;
use crate::processors::error::{check_box, ProcessingError, Result as ProcessingResult};
use crate::processors::filter::VoxelAnchor;

/// Errors raised while reading or writing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// An axis-aligned box given by its two corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Voxel grid, region of interest and ego-vehicle filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Edge length of a voxel in meters
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f32,

    /// Where the voxel lattice is anchored
    #[serde(default)]
    pub anchor: VoxelAnchor,

    /// Lower corner of the region of interest
    #[serde(default = "default_region_min")]
    pub region_min: [f32; 3],

    /// Upper corner of the region of interest
    #[serde(default = "default_region_max")]
    pub region_max: [f32; 3],

    /// Returns inside this box hit the vehicle itself; `null` disables it
    #[serde(default = "default_self_filter")]
    pub self_filter: Option<BoxBounds>,
}

fn default_voxel_size() -> f32 {
    0.3
}

fn default_region_min() -> [f32; 3] {
    [-10.0, -5.0, -2.0]
}

fn default_region_max() -> [f32; 3] {
    [30.0, 8.0, 1.0]
}

fn default_self_filter() -> Option<BoxBounds> {
    Some(BoxBounds {
        min: [-1.5, -1.7, -1.0],
        max: [2.6, 1.7, -0.4],
    })
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            voxel_size: default_voxel_size(),
            anchor: VoxelAnchor::default(),
            region_min: default_region_min(),
            region_max: default_region_max(),
            self_filter: default_self_filter(),
        }
    }
}

/// RANSAC plane fit parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum point-to-plane distance for a ground point, in meters
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    /// Seed of the sampling RNG
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Planes supported by a smaller fraction of the cloud are reported as
    /// low confidence
    #[serde(default = "default_min_inlier_ratio")]
    pub min_inlier_ratio: f32,
}

fn default_max_iterations() -> usize {
    100
}

fn default_distance_threshold() -> f32 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_min_inlier_ratio() -> f32 {
    0.1
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            distance_threshold: default_distance_threshold(),
            seed: default_seed(),
            min_inlier_ratio: default_min_inlier_ratio(),
        }
    }
}

/// Euclidean clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighbour distance in meters
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default = "default_min_size")]
    pub min_size: usize,

    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default)]
    pub method: ClusterMethod,
}

fn default_tolerance() -> f32 {
    1.0
}

fn default_min_size() -> usize {
    3
}

fn default_max_size() -> usize {
    30
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            method: ClusterMethod::default(),
        }
    }
}

/// Frame streaming parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Time budget for the plane fit of one streamed frame
    #[serde(default)]
    pub frame_budget_ms: Option<u64>,
}

/// File format for saved clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudFormat {
    #[default]
    Pcd,
    Ply,
}

impl CloudFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CloudFormat::Pcd => "pcd",
            CloudFormat::Ply => "ply",
        }
    }
}

/// What gets written for each processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Also save the ground and obstacle clouds
    #[serde(default)]
    pub write_clouds: bool,

    #[serde(default)]
    pub format: CloudFormat,
}

/// What a multi-frame run does when one frame fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log the failure and continue with the next frame
    #[default]
    Skip,
    /// Stop at the first failure
    Abort,
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub on_error: OnError,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every parameter without running anything.
    ///
    /// The stages check their own arguments too; this reports a bad file
    /// before the first frame is loaded.
    pub fn validate(&self) -> ProcessingResult<()> {
        let filter = &self.filter;
        if !filter.voxel_size.is_finite() || filter.voxel_size <= 0.0 {
            return Err(ProcessingError::Config(format!(
                "filter.voxel_size must be positive, got {}",
                filter.voxel_size
            )));
        }
        check_box("filter.region", filter.region_min, filter.region_max)?;
        if let Some(bounds) = &filter.self_filter {
            check_box("filter.self_filter", bounds.min, bounds.max)?;
        }

        let seg = &self.segmentation;
        if seg.max_iterations == 0 {
            return Err(ProcessingError::Config(
                "segmentation.max_iterations must be at least 1".to_string(),
            ));
        }
        if !seg.distance_threshold.is_finite() || seg.distance_threshold < 0.0 {
            return Err(ProcessingError::Config(format!(
                "segmentation.distance_threshold must be non-negative, got {}",
                seg.distance_threshold
            )));
        }
        if !(0.0..=1.0).contains(&seg.min_inlier_ratio) {
            return Err(ProcessingError::Config(format!(
                "segmentation.min_inlier_ratio must be within [0, 1], got {}",
                seg.min_inlier_ratio
            )));
        }

        let clustering = &self.clustering;
        if !clustering.tolerance.is_finite() || clustering.tolerance <= 0.0 {
            return Err(ProcessingError::Config(format!(
                "clustering.tolerance must be positive, got {}",
                clustering.tolerance
            )));
        }
        if clustering.min_size == 0 || clustering.min_size > clustering.max_size {
            return Err(ProcessingError::Config(format!(
                "clustering sizes must satisfy 0 < min_size <= max_size, got {}..{}",
                clustering.min_size, clustering.max_size
            )));
        }

        Ok(())
    }
}
