//! Frame driver: filter, segment, cluster and bound one cloud, or every
//! cloud of a directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use super::bounding_box::{bounding_boxes, BoundingBox};
use super::clustering::{cluster_labels, cluster_with_config, Cluster};
use super::error::ProcessingError;
use super::filter::filter_with_config;
use super::segmentation::{segment_with_config, PlaneSegmentation};
use crate::config::{CloudFormat, OnError, OutputConfig, PipelineConfig};
use crate::core::loaders::{list_frames, load_cloud, LoaderError, PointCloud};
use crate::core::transforms::select_indices;
use crate::core::writers::{write_boxes_csv, write_labels_csv, write_pcd, write_ply, WriteError};

/// Errors from running the pipeline over files.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("No point cloud files found in {0}")]
    NoFrames(PathBuf),

    #[error("Frame {path} failed: {source}")]
    Frame {
        path: PathBuf,
        #[source]
        source: Box<PipelineError>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything the pipeline produced for one cloud.
///
/// `ground` and `obstacles` are the two halves of `filtered`; cluster indices
/// refer to `obstacles`, and `boxes[i]` bounds `clusters[i]`.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub filtered: PointCloud,
    pub segmentation: PlaneSegmentation,
    pub ground: PointCloud,
    pub obstacles: PointCloud,
    pub clusters: Vec<Cluster>,
    pub boxes: Vec<BoundingBox>,
    /// Plane supported by less than `segmentation.min_inlier_ratio` of the cloud
    pub low_confidence: bool,
}

impl FrameResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Vec::len).collect()
    }
}

/// Per-frame summary returned by the file-level drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub path: PathBuf,
    pub raw_points: usize,
    pub filtered_points: usize,
    pub ground_points: usize,
    pub obstacle_points: usize,
    pub cluster_sizes: Vec<usize>,
    pub low_confidence: bool,
    pub timed_out: bool,
}

/// Outcome of a directory run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Successful frames in frame order
    pub reports: Vec<FrameReport>,
    /// Frames that failed, with the error message
    pub failures: Vec<(PathBuf, String)>,
}

/// Run filter, plane segmentation, clustering and box extraction on `cloud`.
pub fn process_cloud(
    cloud: &PointCloud,
    config: &PipelineConfig,
) -> std::result::Result<FrameResult, ProcessingError> {
    process_cloud_with_deadline(cloud, config, None)
}

/// [`process_cloud`] with an optional deadline for the plane fit.
pub fn process_cloud_with_deadline(
    cloud: &PointCloud,
    config: &PipelineConfig,
    deadline: Option<Instant>,
) -> std::result::Result<FrameResult, ProcessingError> {
    config.validate()?;

    let filtered = filter_with_config(cloud, &config.filter)?;
    let segmentation = segment_with_config(&filtered, &config.segmentation, deadline)?;

    let low_confidence = segmentation.is_low_confidence(config.segmentation.min_inlier_ratio);
    if low_confidence {
        log::warn!(
            "Ground plane is weakly supported: {:.1}% of {} points (minimum {:.1}%)",
            segmentation.inlier_ratio() * 100.0,
            filtered.len(),
            config.segmentation.min_inlier_ratio * 100.0
        );
    }

    let ground = select_indices(&filtered, &segmentation.ground);
    let obstacles = select_indices(&filtered, &segmentation.obstacles);

    let clusters = cluster_with_config(&obstacles, &config.clustering)?;
    let boxes = bounding_boxes(&obstacles, &clusters)?;

    log::info!(
        "Frame: {} raw -> {} filtered, {} ground, {} obstacle points, {} clusters",
        cloud.len(),
        filtered.len(),
        ground.len(),
        obstacles.len(),
        clusters.len()
    );

    Ok(FrameResult {
        filtered,
        segmentation,
        ground,
        obstacles,
        clusters,
        boxes,
        low_confidence,
    })
}

/// Load one cloud file, process it and, with an `output_dir`, write its
/// results there.
pub fn process_file(path: &Path, config: &PipelineConfig, output_dir: Option<&Path>) -> Result<FrameReport> {
    let cloud = load_cloud(path)?;
    let result = process_cloud(&cloud, config)?;

    if let Some(dir) = output_dir {
        write_frame_outputs(dir, &frame_stem(path), &result, &config.output)?;
    }

    Ok(FrameReport {
        path: path.to_path_buf(),
        raw_points: cloud.len(),
        filtered_points: result.filtered.len(),
        ground_points: result.ground.len(),
        obstacle_points: result.obstacles.len(),
        cluster_sizes: result.cluster_sizes(),
        low_confidence: result.low_confidence,
        timed_out: result.segmentation.timed_out,
    })
}

/// Write the box and label CSVs of a frame, plus its ground and obstacle
/// clouds when `output.write_clouds` is set. Files are named `<stem>_*`.
pub fn write_frame_outputs(dir: &Path, stem: &str, result: &FrameResult, output: &OutputConfig) -> Result<()> {
    write_boxes_csv(
        &dir.join(format!("{}_boxes.csv", stem)),
        &result.boxes,
        &result.cluster_sizes(),
    )?;

    let labels = cluster_labels(result.obstacles.len(), &result.clusters)?;
    write_labels_csv(
        &dir.join(format!("{}_labels.csv", stem)),
        &result.obstacles.to_coords(),
        &labels,
    )?;

    if output.write_clouds {
        let ext = output.format.extension();
        for (name, cloud) in [("ground", &result.ground), ("obstacles", &result.obstacles)] {
            let path = dir.join(format!("{}_{}.{}", stem, name, ext));
            match output.format {
                CloudFormat::Pcd => write_pcd(&path, cloud)?,
                CloudFormat::Ply => write_ply(&path, cloud)?,
            }
        }
    }
    Ok(())
}

/// Process every cloud file of `dir` on the rayon pool.
///
/// With [`OnError::Skip`] failed frames are logged and listed in the summary;
/// with [`OnError::Abort`] the first failure is returned.
pub fn process_directory(
    dir: &Path,
    config: &PipelineConfig,
    output_dir: Option<&Path>,
    limit: Option<usize>,
) -> Result<BatchSummary> {
    config.validate()?;

    let mut frames = list_frames(dir)?;
    if frames.is_empty() {
        return Err(PipelineError::NoFrames(dir.to_path_buf()));
    }
    if let Some(limit) = limit {
        frames.truncate(limit);
    }
    log::info!("Processing {} frames from {}", frames.len(), dir.display());

    let run = |path: &PathBuf| {
        process_file(path, config, output_dir).map_err(|e| PipelineError::Frame {
            path: path.clone(),
            source: Box::new(e),
        })
    };

    match config.on_error {
        OnError::Abort => {
            let reports = frames.par_iter().map(run).collect::<Result<Vec<_>>>()?;
            Ok(BatchSummary {
                reports,
                failures: Vec::new(),
            })
        }
        OnError::Skip => {
            let outcomes: Vec<Result<FrameReport>> = frames.par_iter().map(run).collect();

            let mut summary = BatchSummary::default();
            for (path, outcome) in frames.into_iter().zip(outcomes) {
                match outcome {
                    Ok(report) => summary.reports.push(report),
                    Err(e) => {
                        log::error!("{}", e);
                        summary.failures.push((path, e.to_string()));
                    }
                }
            }
            Ok(summary)
        }
    }
}

/// File name without extension, used to name a frame's outputs.
pub(crate) fn frame_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string())
}
