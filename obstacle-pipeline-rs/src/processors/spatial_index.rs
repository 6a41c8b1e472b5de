//! K-d tree radius search over a point cloud.
//!
//! Wraps a `kiddo` [`ImmutableKdTree`] built from the positions of one cloud.
//! An index is meant to live for a single clustering call: build it from the
//! cloud you are about to cluster and drop it afterwards.

use kiddo::{ImmutableKdTree, SquaredEuclidean};

use crate::core::loaders::PointCloud;

/// Relative padding applied to the kd-tree query radius. Candidates are then
/// filtered with an exact `distance <= radius` test, so boundary points are
/// handled the same way whatever comparison the tree uses internally.
const QUERY_PADDING: f32 = 1e-4;

/// Radius-query index over the points of one cloud.
pub struct SpatialIndex {
    coords: Vec<[f32; 3]>,
    tree: Option<ImmutableKdTree<f32, 3>>,
}

impl SpatialIndex {
    /// Build an index over every point of `cloud`.
    pub fn build(cloud: &PointCloud) -> Self {
        let coords = cloud.to_coords();
        let tree = if coords.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(&coords))
        };
        Self { coords, tree }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Position of indexed point `i`.
    #[inline]
    pub fn position(&self, i: usize) -> [f32; 3] {
        self.coords[i]
    }

    /// Indices of all points within `radius` of `query` (inclusive), ascending.
    pub fn radius_search(&self, query: [f32; 3], radius: f32) -> Vec<usize> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }

        let radius_sq = radius * radius;
        let padded = radius_sq * (1.0 + QUERY_PADDING) + f32::EPSILON;

        let mut found: Vec<usize> = tree
            .within::<SquaredEuclidean>(&query, padded)
            .iter()
            .map(|nn| nn.item as usize)
            .filter(|&idx| squared_distance(&self.coords[idx], &query) <= radius_sq)
            .collect();
        found.sort_unstable();
        found
    }

    /// Indices of all points within `radius` of point `i`, including `i` itself.
    pub fn neighbors_of(&self, i: usize, radius: f32) -> Vec<usize> {
        self.radius_search(self.coords[i], radius)
    }
}

/// Squared Euclidean distance between two positions.
#[inline]
pub fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}
