//! Data writers for PCD, PLY and CSV formats.
//!
//! This module provides functions for writing pipeline output to disk:
//! - PCD v0.7 with ASCII encoding (x, y, z and intensity when present)
//! - PLY (Polygon File Format) with ASCII encoding
//! - CSV with labeled coordinates for clustering results
//! - CSV with one axis-aligned bounding box per cluster

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::loaders::PointCloud;
use crate::processors::bounding_box::BoundingBox;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Mismatched array lengths.
    #[error("array length mismatch: {left_name} has {left} elements, {right_name} has {right} elements")]
    LengthMismatch {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Creates a CSV writer for the given path.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::Writer::from_writer(create_buffered_writer(path)?))
}

/// Maps an I/O error on `path` into [`WriteError::WriteFile`].
fn write_failed(path: &Path) -> impl Fn(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::WriteFile {
        path: path.display().to_string(),
        source,
    }
}

/// Maps a CSV error on `path` into [`WriteError::CsvError`].
fn csv_failed(path: &Path) -> impl Fn(csv::Error) -> WriteError + '_ {
    move |source| WriteError::CsvError {
        path: path.display().to_string(),
        source,
    }
}

/// Write point cloud to an ASCII PCD v0.7 file.
///
/// The `intensity` field is written when the cloud carries it. Coordinates use
/// the shortest representation that reads back to the same `f32`, so a cloud
/// written here and loaded with [`load_pcd`](super::loaders::load_pcd) is
/// bit-identical.
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created, or
/// a write fails.
pub fn write_pcd(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    let err = write_failed(path);

    let n = cloud.len();
    let (fields, sizes, types, counts) = if cloud.has_intensity() {
        ("x y z intensity", "4 4 4 4", "F F F F", "1 1 1 1")
    } else {
        ("x y z", "4 4 4", "F F F", "1 1 1")
    };

    writeln!(writer, "# .PCD v0.7 - Point Cloud Data file format").map_err(&err)?;
    writeln!(writer, "VERSION 0.7").map_err(&err)?;
    writeln!(writer, "FIELDS {}", fields).map_err(&err)?;
    writeln!(writer, "SIZE {}", sizes).map_err(&err)?;
    writeln!(writer, "TYPE {}", types).map_err(&err)?;
    writeln!(writer, "COUNT {}", counts).map_err(&err)?;
    writeln!(writer, "WIDTH {}", n).map_err(&err)?;
    writeln!(writer, "HEIGHT 1").map_err(&err)?;
    writeln!(writer, "VIEWPOINT 0 0 0 1 0 0 0").map_err(&err)?;
    writeln!(writer, "POINTS {}", n).map_err(&err)?;
    writeln!(writer, "DATA ascii").map_err(&err)?;

    for i in 0..n {
        let written = match cloud.intensity.as_ref() {
            Some(intensity) => writeln!(
                writer,
                "{} {} {} {}",
                cloud.x[i], cloud.y[i], cloud.z[i], intensity[i]
            ),
            None => writeln!(writer, "{} {} {}", cloud.x[i], cloud.y[i], cloud.z[i]),
        };
        written.map_err(&err)?;
    }

    writer.flush().map_err(&err)?;
    Ok(())
}

/// Write point cloud to ASCII PLY file.
///
/// Creates an ASCII PLY file with the following format:
/// - Header specifying vertex count and properties (x, y, z[, intensity])
/// - One line per vertex with space-separated values
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created, or
/// a write fails.
///
/// # Example
///
/// ```no_run
/// use obstacle_pipeline::core::loaders::PointCloud;
/// use obstacle_pipeline::core::writers::write_ply;
/// use std::path::Path;
///
/// let cloud = PointCloud::default();
/// write_ply(Path::new("output.ply"), &cloud).unwrap();
/// ```
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    let err = write_failed(path);

    let num_points = cloud.len();

    // Write PLY header
    writeln!(writer, "ply").map_err(&err)?;
    writeln!(writer, "format ascii 1.0").map_err(&err)?;
    writeln!(writer, "element vertex {}", num_points).map_err(&err)?;
    writeln!(writer, "property float x").map_err(&err)?;
    writeln!(writer, "property float y").map_err(&err)?;
    writeln!(writer, "property float z").map_err(&err)?;
    if cloud.has_intensity() {
        writeln!(writer, "property float intensity").map_err(&err)?;
    }
    writeln!(writer, "end_header").map_err(&err)?;

    // Write vertex data
    for i in 0..num_points {
        let (x, y, z) = (cloud.x[i], cloud.y[i], cloud.z[i]);
        let written = match cloud.intensity.as_ref() {
            Some(intensity) => writeln!(writer, "{:.6} {:.6} {:.6} {:.6}", x, y, z, intensity[i]),
            None => writeln!(writer, "{:.6} {:.6} {:.6}", x, y, z),
        };
        written.map_err(&err)?;
    }

    writer.flush().map_err(&err)?;
    Ok(())
}

/// Write labeled coordinates to CSV.
///
/// Creates a CSV file with headers "x,y,z,label" containing coordinate data
/// with associated cluster labels (`-1` for points in no cluster).
///
/// # Errors
///
/// Returns an error if:
/// - `coords` and `labels` have different lengths
/// - Parent directories cannot be created
/// - File cannot be created or written to
///
/// # Example
///
/// ```no_run
/// use obstacle_pipeline::core::writers::write_labels_csv;
/// use std::path::Path;
///
/// let coords = vec![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
/// let labels = vec![0i32, -1];
/// write_labels_csv(Path::new("labels.csv"), &coords, &labels).unwrap();
/// ```
pub fn write_labels_csv(path: &Path, coords: &[[f32; 3]], labels: &[i32]) -> Result<()> {
    // Validate input lengths
    if coords.len() != labels.len() {
        return Err(WriteError::LengthMismatch {
            left_name: "coords",
            left: coords.len(),
            right_name: "labels",
            right: labels.len(),
        });
    }

    let mut csv_writer = create_csv_writer(path)?;
    let csv_err = csv_failed(path);

    // Write header
    csv_writer
        .write_record(["x", "y", "z", "label"])
        .map_err(&csv_err)?;

    // Write data rows
    for (coord, label) in coords.iter().zip(labels.iter()) {
        csv_writer
            .write_record(&[
                format!("{:.6}", coord[0]),
                format!("{:.6}", coord[1]),
                format!("{:.6}", coord[2]),
                label.to_string(),
            ])
            .map_err(&csv_err)?;
    }

    csv_writer.flush().map_err(write_failed(path))?;
    Ok(())
}

/// Write one row per bounding box.
///
/// Columns: `cluster,points,min_x,min_y,min_z,max_x,max_y,max_z`. The
/// `cluster_sizes` slice gives the point count of the cluster each box was
/// derived from.
///
/// # Errors
///
/// Returns an error if `boxes` and `cluster_sizes` differ in length or the
/// file cannot be written.
pub fn write_boxes_csv(path: &Path, boxes: &[BoundingBox], cluster_sizes: &[usize]) -> Result<()> {
    if boxes.len() != cluster_sizes.len() {
        return Err(WriteError::LengthMismatch {
            left_name: "boxes",
            left: boxes.len(),
            right_name: "cluster_sizes",
            right: cluster_sizes.len(),
        });
    }

    let mut csv_writer = create_csv_writer(path)?;
    let csv_err = csv_failed(path);

    csv_writer
        .write_record([
            "cluster", "points", "min_x", "min_y", "min_z", "max_x", "max_y", "max_z",
        ])
        .map_err(&csv_err)?;

    for (id, (bbox, size)) in boxes.iter().zip(cluster_sizes).enumerate() {
        csv_writer
            .write_record(&[
                id.to_string(),
                size.to_string(),
                format!("{:.6}", bbox.min[0]),
                format!("{:.6}", bbox.min[1]),
                format!("{:.6}", bbox.min[2]),
                format!("{:.6}", bbox.max[0]),
                format!("{:.6}", bbox.max[1]),
                format!("{:.6}", bbox.max[2]),
            ])
            .map_err(&csv_err)?;
    }

    csv_writer.flush().map_err(write_failed(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{load_pcd, load_ply};
    use std::fs;
    use tempfile::tempdir;

    fn create_test_cloud() -> PointCloud {
        PointCloud {
            x: vec![1.0, 2.0, 3.0],
            y: vec![4.0, 5.0, 6.0],
            z: vec![7.0, 8.0, 9.0],
            intensity: None,
        }
    }

    fn create_test_cloud_with_intensity() -> PointCloud {
        PointCloud {
            x: vec![1.25, -2.0],
            y: vec![3.0, 4.1],
            z: vec![5.0, 0.003],
            intensity: Some(vec![0.7, 0.05]),
        }
    }

    #[test]
    fn test_write_ply_without_intensity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");
        let cloud = create_test_cloud();

        write_ply(&path, &cloud).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format ascii 1.0");
        assert_eq!(lines[2], "element vertex 3");
        assert_eq!(lines[6], "end_header");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_write_ply_with_intensity_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");
        let cloud = create_test_cloud_with_intensity();

        write_ply(&path, &cloud).unwrap();
        let loaded = load_ply(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert!((loaded.x[0] - 1.25).abs() < 1e-6);
        assert!((loaded.intensity.unwrap()[1] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_write_ply_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir").join("nested").join("test.ply");
        let cloud = create_test_cloud();

        write_ply(&path, &cloud).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_write_pcd_is_lossless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.pcd");
        let cloud = create_test_cloud_with_intensity();

        write_pcd(&path, &cloud).unwrap();
        let loaded = load_pcd(&path).unwrap();

        assert_eq!(loaded, cloud);
    }

    #[test]
    fn test_write_pcd_empty_cloud() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.pcd");

        write_pcd(&path, &PointCloud::new()).unwrap();
        let loaded = load_pcd(&path).unwrap();

        assert!(loaded.is_empty());
    }

    #[test]
    fn test_write_labels_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let coords = vec![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let labels = vec![0i32, -1];

        write_labels_csv(&path, &coords, &labels).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "x,y,z,label");
        assert_eq!(lines.len(), 3); // header + 2 data rows
        assert!(lines[1].ends_with(",0"));
        assert!(lines[2].ends_with(",-1"));
    }

    #[test]
    fn test_write_labels_csv_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let coords = vec![[1.0f32, 2.0, 3.0]];
        let labels = vec![0i32, 1]; // Different length

        let result = write_labels_csv(&path, &coords, &labels);

        match result.unwrap_err() {
            WriteError::LengthMismatch { left, right, .. } => {
                assert_eq!(left, 1);
                assert_eq!(right, 2);
            }
            _ => panic!("Expected LengthMismatch error"),
        }
    }

    #[test]
    fn test_write_boxes_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boxes.csv");
        let boxes = vec![BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [2.0, 1.0, 2.0],
        }];

        write_boxes_csv(&path, &boxes, &[3]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "cluster,points,min_x,min_y,min_z,max_x,max_y,max_z");
        assert_eq!(
            lines[1],
            "0,3,0.000000,0.000000,0.000000,2.000000,1.000000,2.000000"
        );
    }
}
