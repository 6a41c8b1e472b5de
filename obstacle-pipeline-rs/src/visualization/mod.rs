//! Top-down (x/y) plots of clouds and processed frames.
//!
//! Plots carry no axis text, so no font backend is needed.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::loaders::PointCloud;
use crate::core::transforms::{compute_bounds, intensity_to_colors, subsample_cloud};
use crate::processors::pipeline::FrameResult;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty point cloud")]
    EmptyPointCloud,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Color palette for clusters and their boxes.
const CLUSTER_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
];

const GROUND_COLOR: RGBColor = RGBColor(190, 190, 190);
/// Obstacle points outside every cluster.
const UNCLUSTERED_COLOR: RGBColor = RGBColor(90, 90, 90);
const DEFAULT_POINT_COLOR: RGBColor = RGBColor(100, 149, 237);

fn plotting_error<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

fn cluster_color(id: usize) -> RGBColor {
    let (r, g, b) = CLUSTER_COLORS[id % CLUSTER_COLORS.len()];
    RGBColor(r, g, b)
}

/// Plot range covering `clouds` with 5% padding; flat axes get 1 m either side.
fn plot_range(clouds: &[&PointCloud]) -> Option<((f32, f32), (f32, f32))> {
    let (mut lo, mut hi) = ([f32::INFINITY; 2], [f32::NEG_INFINITY; 2]);
    for (min, max) in clouds.iter().filter_map(|c| compute_bounds(c)) {
        for axis in 0..2 {
            lo[axis] = lo[axis].min(min[axis]);
            hi[axis] = hi[axis].max(max[axis]);
        }
    }
    if !lo[0].is_finite() {
        return None;
    }

    let pad = |lo: f32, hi: f32| {
        if hi - lo < f32::EPSILON {
            (lo - 1.0, hi + 1.0)
        } else {
            let p = (hi - lo) * 0.05;
            (lo - p, hi + p)
        }
    };
    Some((pad(lo[0], hi[0]), pad(lo[1], hi[1])))
}

/// Scatter plot of a raw cloud, shaded by intensity when the cloud has it.
///
/// Clouds larger than `max_points` are randomly subsampled first.
pub fn plot_point_cloud(output_path: &Path, cloud: &PointCloud, max_points: usize) -> Result<()> {
    if cloud.is_empty() {
        return Err(VisualizationError::EmptyPointCloud);
    }

    let (sample, stride) = subsample_cloud(cloud, max_points);
    if stride > 1 {
        log::info!("Plotting {} of {} points", sample.len(), cloud.len());
    }
    let Some((x_range, y_range)) = plot_range(&[&sample]) else {
        return Err(VisualizationError::EmptyPointCloud);
    };

    let colors: Vec<RGBColor> = match sample.intensity {
        Some(ref values) => intensity_to_colors(values)
            .into_iter()
            .map(|[r, g, b]| RGBColor(r, g, b))
            .collect(),
        None => vec![DEFAULT_POINT_COLOR; sample.len()],
    };

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
        .map_err(plotting_error)?;

    chart
        .draw_series(
            (0..sample.len()).map(|i| Circle::new((sample.x[i], sample.y[i]), 2, colors[i].filled())),
        )
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;
    Ok(())
}

/// Plot a processed frame: ground in grey, each cluster in its own color with
/// its bounding box drawn as a rectangle.
pub fn plot_frame(output_path: &Path, frame: &FrameResult, max_points: usize) -> Result<()> {
    if frame.filtered.is_empty() {
        return Err(VisualizationError::EmptyPointCloud);
    }
    let Some((x_range, y_range)) = plot_range(&[&frame.ground, &frame.obstacles]) else {
        return Err(VisualizationError::EmptyPointCloud);
    };

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
        .map_err(plotting_error)?;

    let (ground, _) = subsample_cloud(&frame.ground, max_points);
    chart
        .draw_series(
            (0..ground.len()).map(|i| Circle::new((ground.x[i], ground.y[i]), 1, GROUND_COLOR.filled())),
        )
        .map_err(plotting_error)?;

    let mut owner = vec![None; frame.obstacles.len()];
    for (id, cluster) in frame.clusters.iter().enumerate() {
        for &i in cluster {
            if let Some(slot) = owner.get_mut(i) {
                *slot = Some(id);
            }
        }
    }
    let obstacles = &frame.obstacles;
    chart
        .draw_series((0..obstacles.len()).map(|i| {
            let color = owner[i].map_or(UNCLUSTERED_COLOR, cluster_color);
            Circle::new((obstacles.x[i], obstacles.y[i]), 2, color.filled())
        }))
        .map_err(plotting_error)?;

    chart
        .draw_series(frame.boxes.iter().enumerate().map(|(id, bbox)| {
            Rectangle::new(
                [(bbox.min[0], bbox.min[1]), (bbox.max[0], bbox.max[1])],
                cluster_color(id).stroke_width(2),
            )
        }))
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::pipeline::process_cloud;
    use crate::processors::pipeline::tests::{scene_config, street_scene};
    use tempfile::TempDir;

    #[test]
    fn test_plot_range_pads_flat_axes() {
        let cloud = PointCloud::from_positions(&[[1.0, 2.0, 0.0], [1.0, 4.0, 0.0]]);
        let ((x0, x1), (y0, y1)) = plot_range(&[&cloud]).unwrap();
        assert_eq!((x0, x1), (0.0, 2.0));
        assert!(y0 < 2.0 && y1 > 4.0);
        assert!(plot_range(&[&PointCloud::new()]).is_none());
    }

    #[test]
    fn test_plot_point_cloud_writes_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.png");

        plot_point_cloud(&path, &street_scene(), 500).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_plot_frame_writes_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        let frame = process_cloud(&street_scene(), &scene_config()).unwrap();

        plot_frame(&path, &frame, 10_000).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_empty_cloud_fails() {
        let dir = TempDir::new().unwrap();
        let result = plot_point_cloud(&dir.path().join("empty.png"), &PointCloud::new(), 100);
        assert!(matches!(result, Err(VisualizationError::EmptyPointCloud)));
    }
}
