//! Cluster trees
//!
//! A cluster tree is a hierarchical partition of an index set. Node ids are assigned level by
//! level, so that the nodes of level `l` are `levels()[l]..levels()[l + 1]`, and every node owns a
//! contiguous range of a permutation of the original indices.
use std::cmp::Ordering;

use crate::types::{H2Error, H2Result, RealScalar};

/// Axis-aligned bounding box of a set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox<T: RealScalar> {
    /// Lower corner
    pub lower: Vec<T>,
    /// Upper corner
    pub upper: Vec<T>,
}

impl<T: RealScalar> BoundingBox<T> {
    /// Bounding box of the points `points[dim * i..dim * (i + 1)]` for `i` in `indices`.
    pub fn from_points(points: &[T], dim: usize, indices: &[usize]) -> Self {
        let mut lower = vec![<T as num::Float>::infinity(); dim];
        let mut upper = vec![<T as num::Float>::neg_infinity(); dim];
        for &i in indices {
            for d in 0..dim {
                let x = points[dim * i + d];
                lower[d] = num::Float::min(lower[d], x);
                upper[d] = num::Float::max(upper[d], x);
            }
        }
        Self { lower, upper }
    }

    /// Length of the diagonal.
    pub fn diameter(&self) -> T {
        let sq = self
            .lower
            .iter()
            .zip(&self.upper)
            .fold(T::zero(), |acc, (&l, &u)| acc + (u - l) * (u - l));
        num::Float::sqrt(sq)
    }

    /// Euclidean distance between two boxes, zero if they intersect.
    pub fn distance(&self, other: &Self) -> T {
        let mut sq = T::zero();
        for d in 0..self.lower.len() {
            let gap = num::Float::max(
                num::Float::max(other.lower[d] - self.upper[d], self.lower[d] - other.upper[d]),
                T::zero(),
            );
            sq += gap * gap;
        }
        num::Float::sqrt(sq)
    }

    /// The axis along which the box is widest.
    pub fn widest_axis(&self) -> usize {
        let mut axis = 0;
        let mut width = <T as num::Float>::neg_infinity();
        for (d, (&l, &u)) in self.lower.iter().zip(&self.upper).enumerate() {
            if u - l > width {
                width = u - l;
                axis = d;
            }
        }
        axis
    }
}

/// A cluster tree.
#[derive(Debug, Clone)]
pub struct ClusterTree<T: RealScalar> {
    children: Vec<Vec<usize>>,
    parent: Vec<Option<usize>>,
    ranges: Vec<(usize, usize)>,
    permutation: Vec<usize>,
    levels: Vec<usize>,
    bounds: Option<Vec<BoundingBox<T>>>,
}

impl<T: RealScalar> ClusterTree<T> {
    /// Build a tree by recursive bisection of a point cloud.
    ///
    /// `points` holds `dim` coordinates per point. A node is split at the median along the
    /// widest axis of its bounding box while it holds more than `block_size` points.
    pub fn from_points(points: &[T], dim: usize, block_size: usize) -> H2Result<Self> {
        if dim == 0 || points.len() % dim != 0 {
            return Err(H2Error::Tree(format!(
                "Point data of length {} is not a multiple of the dimension {}",
                points.len(),
                dim
            )));
        }
        if block_size == 0 {
            return Err(H2Error::Tree("Block size must be positive".to_string()));
        }
        let npoints = points.len() / dim;
        if npoints == 0 {
            return Err(H2Error::Tree("Cannot build a tree without points".to_string()));
        }

        let mut permutation = (0..npoints).collect::<Vec<_>>();
        let mut children = vec![vec![]];
        let mut parent = vec![None];
        let mut ranges = vec![(0, npoints)];
        let mut bounds = vec![BoundingBox::from_points(points, dim, &permutation)];
        let mut levels = vec![0];

        let mut start = 0;
        loop {
            let end = ranges.len();
            levels.push(end);
            for node in start..end {
                let (first, last) = ranges[node];
                if last - first <= block_size {
                    continue;
                }
                let axis = bounds[node].widest_axis();
                permutation[first..last].sort_by(|&p, &q| {
                    points[dim * p + axis]
                        .partial_cmp(&points[dim * q + axis])
                        .unwrap_or(Ordering::Equal)
                });
                let middle = first + (last - first) / 2;
                for (lo, hi) in [(first, middle), (middle, last)] {
                    let id = ranges.len();
                    ranges.push((lo, hi));
                    parent.push(Some(node));
                    children.push(vec![]);
                    bounds.push(BoundingBox::from_points(points, dim, &permutation[lo..hi]));
                    children[node].push(id);
                }
            }
            if ranges.len() == end {
                break;
            }
            start = end;
        }

        log::debug!(
            "Built cluster tree with {} nodes on {} levels for {} points",
            ranges.len(),
            levels.len() - 1,
            npoints
        );

        Ok(Self {
            children,
            parent,
            ranges,
            permutation,
            levels,
            bounds: Some(bounds),
        })
    }

    /// Build a tree from caller-supplied parts.
    ///
    /// `children[i]` lists the children of node `i`, `ranges[i]` is the half-open range of
    /// `permutation` owned by node `i`. Node `0` is the root, node ids must be ordered by level
    /// and the ranges of the children must partition the range of their parent in order.
    pub fn from_parts(
        children: Vec<Vec<usize>>,
        ranges: Vec<(usize, usize)>,
        permutation: Vec<usize>,
    ) -> H2Result<Self> {
        let nnodes = children.len();
        if nnodes == 0 || ranges.len() != nnodes {
            return Err(H2Error::Tree(format!(
                "Expected one range per node, got {} ranges for {} nodes",
                ranges.len(),
                nnodes
            )));
        }
        let size = permutation.len();
        let mut seen = vec![false; size];
        for &p in &permutation {
            if p >= size || seen[p] {
                return Err(H2Error::Tree("Invalid index permutation".to_string()));
            }
            seen[p] = true;
        }
        if ranges[0] != (0, size) {
            return Err(H2Error::Tree("Root must own all indices".to_string()));
        }

        let mut parent = vec![None; nnodes];
        let mut level = vec![0; nnodes];
        for node in 0..nnodes {
            let (first, last) = ranges[node];
            if first >= last || last > size {
                return Err(H2Error::Tree(format!("Node {node} has an invalid range")));
            }
            if children[node].is_empty() {
                continue;
            }
            let mut position = first;
            for &c in &children[node] {
                if c <= node || c >= nnodes || parent[c].is_some() {
                    return Err(H2Error::Tree(format!(
                        "Invalid child {c} of node {node}"
                    )));
                }
                parent[c] = Some(node);
                level[c] = level[node] + 1;
                if ranges[c].0 != position {
                    return Err(H2Error::Tree(format!(
                        "Children of node {node} do not partition its range"
                    )));
                }
                position = ranges[c].1;
            }
            if position != last {
                return Err(H2Error::Tree(format!(
                    "Children of node {node} do not partition its range"
                )));
            }
        }
        if let Some(orphan) = (1..nnodes).find(|&i| parent[i].is_none()) {
            return Err(H2Error::Tree(format!("Node {orphan} has no parent")));
        }
        if level.windows(2).any(|w| w[1] < w[0]) {
            return Err(H2Error::Tree("Node ids must be ordered by level".to_string()));
        }

        let nlevels = level[nnodes - 1] + 1;
        let mut levels = vec![0; nlevels + 1];
        for l in 0..nlevels {
            levels[l + 1] = level.iter().filter(|&&x| x <= l).count();
        }

        Ok(Self {
            children,
            parent,
            ranges,
            permutation,
            levels,
            bounds: None,
        })
    }

    /// Number of nodes.
    pub fn nnodes(&self) -> usize {
        self.ranges.len()
    }

    /// Number of indices partitioned by the tree.
    pub fn size(&self) -> usize {
        self.permutation.len()
    }

    /// Level offsets: the nodes of level `l` are `levels()[l]..levels()[l + 1]`.
    pub fn levels(&self) -> &[usize] {
        &self.levels
    }

    /// Number of levels.
    pub fn nlevels(&self) -> usize {
        self.levels.len() - 1
    }

    /// Nodes on a given level.
    pub fn level_nodes(&self, level: usize) -> std::ops::Range<usize> {
        self.levels[level]..self.levels[level + 1]
    }

    /// Level of a node.
    pub fn level(&self, node: usize) -> usize {
        self.levels.partition_point(|&offset| offset <= node) - 1
    }

    /// Parent of a node.
    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    /// Children of a node.
    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    /// Check if a node is a leaf.
    pub fn is_leaf(&self, node: usize) -> bool {
        self.children[node].is_empty()
    }

    /// Original indices owned by a node.
    pub fn index(&self, node: usize) -> &[usize] {
        let (first, last) = self.ranges[node];
        &self.permutation[first..last]
    }

    /// Range of the permutation owned by a node.
    pub fn range(&self, node: usize) -> (usize, usize) {
        self.ranges[node]
    }

    /// Permutation of the original indices.
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Bounding box of a node, if the tree was built from points.
    pub fn bounds(&self, node: usize) -> Option<&BoundingBox<T>> {
        self.bounds.as_ref().map(|b| &b[node])
    }

    /// Iterate over all leaves.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nnodes()).filter(|&i| self.is_leaf(i))
    }
}
