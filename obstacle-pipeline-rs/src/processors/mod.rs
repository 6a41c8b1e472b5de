//! Pipeline stages and the drivers that chain them.

pub mod bounding_box;
pub mod clustering;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod segmentation;
pub mod spatial_index;
pub mod stream;

// Re-export key types for convenience
pub use bounding_box::{bounding_box, bounding_boxes, BoundingBox};
pub use clustering::{
    cluster_labels, cluster_with_config, euclidean_cluster, euclidean_cluster_union_find, Cluster,
    ClusterMethod,
};
pub use error::{ProcessingError, Result};
pub use filter::{crop_region, filter_cloud, filter_with_config, remove_box, voxel_downsample, VoxelAnchor};
pub use pipeline::{
    process_cloud, process_cloud_with_deadline, process_directory, process_file, BatchSummary,
    FrameReport, FrameResult, PipelineError,
};
pub use segmentation::{segment_plane, segment_plane_with_deadline, PlaneModel, PlaneSegmentation};
pub use spatial_index::SpatialIndex;
pub use stream::{FrameStream, StreamStats, Submission};
