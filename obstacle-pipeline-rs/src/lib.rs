//! LiDAR obstacle detection pipeline.
//!
//! Turns a raw point cloud from a range sensor into a handful of obstacle
//! candidates in four stages:
//! - voxel downsampling, region-of-interest crop and ego-vehicle removal
//! - RANSAC ground plane segmentation
//! - Euclidean clustering of the obstacle points (kd-tree backed)
//! - axis-aligned bounding boxes around each cluster
//!
//! PCD, PLY and CSV loaders, writers, top-down plots and a frame stream for
//! live input sit around the core stages.
//!
//! # Example
//!
//! ```no_run
//! use obstacle_pipeline::{core::loaders::load_cloud, processors::process_cloud, PipelineConfig};
//!
//! let cloud = load_cloud("scan_0001.pcd").unwrap();
//! let frame = process_cloud(&cloud, &PipelineConfig::default()).unwrap();
//! for bbox in &frame.boxes {
//!     println!("{:?} .. {:?}", bbox.min, bbox.max);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{
    ClusteringConfig, FilterConfig, OnError, OutputConfig, PipelineConfig, SegmentationConfig,
    StreamConfig,
};
pub use crate::core::loaders::{Point, PointCloud};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
