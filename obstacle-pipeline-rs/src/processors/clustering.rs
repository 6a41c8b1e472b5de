//! Euclidean clustering of obstacle points.
//!
//! Two points are neighbours when they lie within `tolerance` of each other;
//! a cluster is a connected component of that neighbour graph whose size falls
//! within `[min_size, max_size]`. Components outside the size bounds are
//! dropped without error.
//!
//! Two strategies produce identical output:
//!
//! * [`euclidean_cluster`] grows each component breadth-first from its lowest
//!   unvisited index.
//! * [`euclidean_cluster_union_find`] queries all neighbourhoods in parallel and
//!   merges them with a lock-free union-find.
//!
//! Both build a fresh [`SpatialIndex`] for the call. Every cluster is an
//! ascending index list and clusters are ordered by their smallest index.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{ProcessingError, Result};
use super::spatial_index::SpatialIndex;
use crate::config::ClusteringConfig;
use crate::core::loaders::PointCloud;

/// Indices into the clustered cloud, ascending.
pub type Cluster = Vec<usize>;

/// Label given to points that belong to no cluster.
pub const NOISE_LABEL: i32 = -1;

/// Which traversal builds the connected components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    #[default]
    BreadthFirst,
    UnionFind,
}

/// Lock-free union-find over `0..size`.
///
/// Roots are always linked towards the larger index, so concurrent merges
/// converge on one root per component whatever order they run in.
pub struct ConcurrentUnionFind {
    parent: Vec<AtomicUsize>,
}

impl ConcurrentUnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).map(AtomicUsize::new).collect(),
        }
    }

    /// Root of the set containing `x`, halving the path on the way up.
    pub fn root(&self, mut x: usize) -> usize {
        loop {
            let parent = self.parent[x].load(Ordering::Relaxed);
            if parent == x {
                return x;
            }
            let grandparent = self.parent[parent].load(Ordering::Relaxed);
            if grandparent != parent {
                // Losing this race only skips one compression step.
                let _ = self.parent[x].compare_exchange_weak(
                    parent,
                    grandparent,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            x = parent;
        }
    }

    /// Merge the sets of `x` and `y`. Returns false if they were already joined.
    pub fn merge(&self, x: usize, y: usize) -> bool {
        loop {
            let (rx, ry) = (self.root(x), self.root(y));
            if rx == ry {
                return false;
            }
            let (low, high) = if rx < ry { (rx, ry) } else { (ry, rx) };
            if self.parent[low]
                .compare_exchange_weak(low, high, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Group `cloud` into Euclidean clusters, breadth-first.
///
/// # Errors
///
/// [`ProcessingError::Config`] unless `tolerance` is positive and finite and
/// `0 < min_size <= max_size`.
///
/// # Example
///
/// ```
/// use obstacle_pipeline::core::loaders::PointCloud;
/// use obstacle_pipeline::processors::clustering::euclidean_cluster;
///
/// let cloud = PointCloud::from_positions(&[
///     [0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [1.0, 0.0, 0.0],
///     [10.0, 0.0, 0.0], [10.5, 0.0, 0.0],
/// ]);
/// let clusters = euclidean_cluster(&cloud, 0.6, 3, 100).unwrap();
/// assert_eq!(clusters, vec![vec![0, 1, 2]]);
/// ```
pub fn euclidean_cluster(
    cloud: &PointCloud,
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<Vec<Cluster>> {
    validate(tolerance, min_size, max_size)?;
    if cloud.is_empty() {
        return Ok(Vec::new());
    }

    let index = SpatialIndex::build(cloud);
    let n = index.len();
    let mut visited = vec![false; n];
    let mut queue = VecDeque::new();
    let mut clusters = Vec::new();
    let mut rejected = 0usize;

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push_back(seed);

        let mut members = Vec::new();
        while let Some(current) = queue.pop_front() {
            members.push(current);
            for neighbor in index.neighbors_of(current, tolerance) {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        if (min_size..=max_size).contains(&members.len()) {
            members.sort_unstable();
            clusters.push(members);
        } else {
            rejected += 1;
        }
    }

    log::debug!(
        "euclidean_cluster: {} points -> {} clusters ({} components outside size bounds)",
        n,
        clusters.len(),
        rejected
    );
    Ok(clusters)
}

/// Same clusters as [`euclidean_cluster`], built with parallel neighbour
/// queries and a [`ConcurrentUnionFind`].
pub fn euclidean_cluster_union_find(
    cloud: &PointCloud,
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<Vec<Cluster>> {
    validate(tolerance, min_size, max_size)?;
    if cloud.is_empty() {
        return Ok(Vec::new());
    }

    let index = SpatialIndex::build(cloud);
    let n = index.len();
    let sets = ConcurrentUnionFind::new(n);

    (0..n).into_par_iter().for_each(|i| {
        for j in index.neighbors_of(i, tolerance) {
            if j > i {
                sets.merge(i, j);
            }
        }
    });

    // Walking indices in order keeps every component ascending and orders
    // components by their first member.
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    let mut components: Vec<Cluster> = Vec::new();
    for i in 0..n {
        let slot = *slot_of_root.entry(sets.root(i)).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(i);
    }

    let total = components.len();
    let clusters: Vec<Cluster> = components
        .into_iter()
        .filter(|c| (min_size..=max_size).contains(&c.len()))
        .collect();

    log::debug!(
        "euclidean_cluster_union_find: {} points -> {} clusters ({} components outside size bounds)",
        n,
        clusters.len(),
        total - clusters.len()
    );
    Ok(clusters)
}

/// Cluster with the strategy and parameters from `config`.
pub fn cluster_with_config(cloud: &PointCloud, config: &ClusteringConfig) -> Result<Vec<Cluster>> {
    match config.method {
        ClusterMethod::BreadthFirst => {
            euclidean_cluster(cloud, config.tolerance, config.min_size, config.max_size)
        }
        ClusterMethod::UnionFind => {
            euclidean_cluster_union_find(cloud, config.tolerance, config.min_size, config.max_size)
        }
    }
}

/// Per-point labels: the cluster's position in `clusters`, or [`NOISE_LABEL`].
///
/// # Errors
///
/// [`ProcessingError::InvalidIndex`] if a cluster refers past `n` points.
pub fn cluster_labels(n: usize, clusters: &[Cluster]) -> Result<Vec<i32>> {
    let mut labels = vec![NOISE_LABEL; n];
    for (label, cluster) in clusters.iter().enumerate() {
        for &index in cluster {
            let slot = labels
                .get_mut(index)
                .ok_or(ProcessingError::InvalidIndex { index, len: n })?;
            *slot = label as i32;
        }
    }
    Ok(labels)
}

fn validate(tolerance: f32, min_size: usize, max_size: usize) -> Result<()> {
    if !tolerance.is_finite() || tolerance <= 0.0 {
        return Err(ProcessingError::Config(format!(
            "cluster tolerance must be positive and finite, got {}",
            tolerance
        )));
    }
    if min_size == 0 || min_size > max_size {
        return Err(ProcessingError::Config(format!(
            "cluster sizes must satisfy 0 < min_size <= max_size, got min={} max={}",
            min_size, max_size
        )));
    }
    Ok(())
}
