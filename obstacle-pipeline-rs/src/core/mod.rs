//! Core data types and I/O operations.

pub mod loaders;
pub mod transforms;
pub mod writers;

pub use loaders::{load_cloud, list_frames, LoaderError, Point, PointCloud};
pub use writers::{write_boxes_csv, write_labels_csv, write_pcd, write_ply, WriteError};
