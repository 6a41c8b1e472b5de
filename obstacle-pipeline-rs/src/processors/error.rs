//! Errors shared by the filter, segmentation, clustering and bounding box stages.

use thiserror::Error;

/// Errors that can occur inside a processing stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    /// An invalid parameter was supplied. Parameters are never clamped.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Too few points for the requested operation.
    #[error("Insufficient data: {points} points supplied, at least {required} required")]
    InsufficientData { points: usize, required: usize },

    /// An operation was asked to summarise an empty set.
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// Every RANSAC sample was degenerate (collinear or coincident points).
    #[error("No plane found: all {iterations} sampled triples were degenerate")]
    NoPlaneFound { iterations: usize },

    /// An index does not refer to a point of the cloud.
    #[error("Index {index} out of range for cloud of {len} points")]
    InvalidIndex { index: usize, len: usize },
}

/// Result type for processing stages.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Fails with [`ProcessingError::Config`] unless `min <= max` on every axis.
pub(crate) fn check_box(name: &str, min: [f32; 3], max: [f32; 3]) -> Result<()> {
    for axis in 0..3 {
        if !min[axis].is_finite() || !max[axis].is_finite() {
            return Err(ProcessingError::Config(format!(
                "{} bounds must be finite, got min={:?} max={:?}",
                name, min, max
            )));
        }
        if min[axis] > max[axis] {
            return Err(ProcessingError::Config(format!(
                "{} min must not exceed max on any axis, got min={:?} max={:?}",
                name, min, max
            )));
        }
    }
    Ok(())
}
