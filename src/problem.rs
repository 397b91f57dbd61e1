//! Problem definition: a kernel and a pair of cluster trees with their block partition
use crate::traits::Kernel;
use crate::tree::ClusterTree;
use crate::types::{H2Error, H2Result, RealScalar, RlstArray, Side};

/// Admissibility condition used to split the block partition into far and close blocks.
///
/// A pair of nodes is far if `max(diam(a), diam(b)) <= eta * dist(a, b)`, where `diam` and `dist`
/// are computed from axis-aligned bounding boxes.
#[derive(Debug, Clone, Copy)]
pub struct Admissibility<T: RealScalar> {
    /// Ratio between cluster size and cluster distance
    pub eta: T,
}

impl<T: RealScalar> Default for Admissibility<T> {
    fn default() -> Self {
        Self { eta: T::one() }
    }
}

impl<T: RealScalar> Admissibility<T> {
    fn is_far(&self, row: &ClusterTree<T>, i: usize, col: &ClusterTree<T>, j: usize) -> H2Result<bool> {
        match (row.bounds(i), col.bounds(j)) {
            (Some(a), Some(b)) => {
                let dist = a.distance(b);
                let diam = num::Float::max(a.diameter(), b.diameter());
                Ok(dist > T::zero() && diam <= self.eta * dist)
            }
            _ => Err(H2Error::Construction(
                "Geometric admissibility requires trees built from points".to_string(),
            )),
        }
    }
}

/// Far and close lists of one side of the block partition.
#[derive(Debug, Clone)]
struct BlockLists {
    far: Vec<Vec<usize>>,
    close: Vec<Vec<usize>>,
    far_mirror: Vec<Vec<usize>>,
    close_mirror: Vec<Vec<usize>>,
    notransition: Vec<bool>,
}

impl BlockLists {
    fn new(far: Vec<Vec<usize>>, close: Vec<Vec<usize>>) -> Self {
        let nnodes = far.len();
        Self {
            far,
            close,
            far_mirror: vec![vec![]; nnodes],
            close_mirror: vec![vec![]; nnodes],
            notransition: vec![true; nnodes],
        }
    }
}

/// Transpose node lists: `out[j]` contains every `i` with `j` in `lists[i]`.
fn transpose_lists(lists: &[Vec<usize>], ndual: usize) -> Vec<Vec<usize>> {
    let mut out = vec![vec![]; ndual];
    for (i, list) in lists.iter().enumerate() {
        for &j in list {
            out[j].push(i);
        }
    }
    out
}

/// Position of `node` in the dual list of each of its neighbours.
fn mirror_positions(
    lists: &[Vec<usize>],
    dual: &[Vec<usize>],
    what: &str,
) -> H2Result<Vec<Vec<usize>>> {
    lists
        .iter()
        .enumerate()
        .map(|(i, list)| {
            list.iter()
                .map(|&j| {
                    dual[j].iter().position(|&x| x == i).ok_or_else(|| {
                        H2Error::Construction(format!(
                            "{what} lists are not symmetric: node {i} lists {j} but not vice versa"
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// A node needs a transfer matrix if it or one of its ancestors has far neighbours.
fn notransition<T: RealScalar>(tree: &ClusterTree<T>, far: &[Vec<usize>]) -> Vec<bool> {
    let mut needs = vec![false; tree.nnodes()];
    for node in 0..tree.nnodes() {
        let inherited = tree.parent(node).map(|p| needs[p]).unwrap_or(false);
        needs[node] = inherited || !far[node].is_empty();
    }
    needs.into_iter().map(|n| !n).collect()
}

/// Compute far and close lists of the row tree by a dual tree traversal.
fn dual_traversal<T: RealScalar>(
    row: &ClusterTree<T>,
    col: &ClusterTree<T>,
    admissibility: &Admissibility<T>,
) -> H2Result<(Vec<Vec<usize>>, Vec<Vec<usize>>)> {
    let mut far = vec![vec![]; row.nnodes()];
    let mut close = vec![vec![]; row.nnodes()];
    let mut stack = vec![(0, 0)];
    while let Some((i, j)) = stack.pop() {
        if admissibility.is_far(row, i, col, j)? {
            far[i].push(j);
            continue;
        }
        match (row.is_leaf(i), col.is_leaf(j)) {
            (true, true) => close[i].push(j),
            (true, false) => stack.extend(col.children(j).iter().map(|&cj| (i, cj))),
            (false, true) => stack.extend(row.children(i).iter().map(|&ci| (ci, j))),
            (false, false) => {
                for &ci in row.children(i) {
                    stack.extend(col.children(j).iter().map(|&cj| (ci, cj)));
                }
            }
        }
    }
    for list in far.iter_mut().chain(close.iter_mut()) {
        list.sort_unstable();
    }
    Ok((far, close))
}

/// Traversal order: batches of nodes from the deepest level up to the root.
///
/// Each batch holds one level of the row tree followed by the same level of the column tree.
/// Iterating forwards visits children before parents, iterating backwards visits parents first.
fn build_queue<T: RealScalar>(
    row: &ClusterTree<T>,
    col: Option<&ClusterTree<T>>,
) -> Vec<Vec<(Side, usize)>> {
    let nlevels = row.nlevels().max(col.map(|c| c.nlevels()).unwrap_or(0));
    (0..nlevels)
        .rev()
        .map(|level| {
            let mut batch = vec![];
            if level < row.nlevels() {
                batch.extend(row.level_nodes(level).map(|i| (Side::Row, i)));
            }
            if let Some(col) = col {
                if level < col.nlevels() {
                    batch.extend(col.level_nodes(level).map(|j| (Side::Col, j)));
                }
            }
            batch
        })
        .collect()
}

/// A kernel together with row and column cluster trees and their block partition.
///
/// For symmetric problems the column tree and lists are the row tree and lists.
pub struct Problem<T: RealScalar, K: Kernel<T = T>> {
    kernel: K,
    row_tree: ClusterTree<T>,
    col_tree: Option<ClusterTree<T>>,
    row_lists: BlockLists,
    col_lists: Option<BlockLists>,
    queue: Vec<Vec<(Side, usize)>>,
}

impl<T: RealScalar, K: Kernel<T = T>> std::fmt::Debug for Problem<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [m, n] = self.shape();
        write!(
            f,
            "Problem of shape {}x{} with {} row nodes and {} column nodes (symmetric: {})",
            m,
            n,
            self.row_tree.nnodes(),
            self.tree(Side::Col).nnodes(),
            self.is_symmetric()
        )
    }
}

impl<T: RealScalar, K: Kernel<T = T>> Problem<T, K> {
    /// Create a problem with distinct row and column trees.
    pub fn new(
        kernel: K,
        row_tree: ClusterTree<T>,
        col_tree: ClusterTree<T>,
        admissibility: Admissibility<T>,
    ) -> H2Result<Self> {
        let (far, close) = dual_traversal(&row_tree, &col_tree, &admissibility)?;
        Self::from_lists(kernel, row_tree, Some(col_tree), far, close)
    }

    /// Create a symmetric problem: the kernel satisfies `K(x, y) = K(y, x)` and rows and columns
    /// share one tree.
    pub fn symmetric(
        kernel: K,
        tree: ClusterTree<T>,
        admissibility: Admissibility<T>,
    ) -> H2Result<Self> {
        let (far, close) = dual_traversal(&tree, &tree, &admissibility)?;
        Self::from_lists(kernel, tree, None, far, close)
    }

    /// Create a problem from caller-supplied far and close lists of the row tree.
    ///
    /// The column-side lists are derived by transposition. Passing no column tree declares the
    /// problem symmetric, in which case the lists must be symmetric.
    pub fn from_lists(
        kernel: K,
        row_tree: ClusterTree<T>,
        col_tree: Option<ClusterTree<T>>,
        row_far: Vec<Vec<usize>>,
        row_close: Vec<Vec<usize>>,
    ) -> H2Result<Self> {
        let nrow = row_tree.nnodes();
        let ncol = col_tree.as_ref().unwrap_or(&row_tree).nnodes();
        if row_far.len() != nrow || row_close.len() != nrow {
            return Err(H2Error::Construction(format!(
                "Expected far and close lists for {} nodes, got {} and {}",
                nrow,
                row_far.len(),
                row_close.len()
            )));
        }
        if row_far.iter().chain(&row_close).flatten().any(|&j| j >= ncol) {
            return Err(H2Error::Construction(
                "Far or close list refers to a node outside the column tree".to_string(),
            ));
        }
        let expected = [
            row_tree.size(),
            col_tree.as_ref().unwrap_or(&row_tree).size(),
        ];
        if kernel.shape() != expected {
            return Err(H2Error::Construction(format!(
                "Kernel shape {:?} does not match tree sizes {:?}",
                kernel.shape(),
                expected
            )));
        }

        let mut row_lists = BlockLists::new(row_far, row_close);
        let col_lists = match &col_tree {
            Some(col) => {
                let mut lists = BlockLists::new(
                    transpose_lists(&row_lists.far, ncol),
                    transpose_lists(&row_lists.close, ncol),
                );
                row_lists.far_mirror = mirror_positions(&row_lists.far, &lists.far, "Far")?;
                row_lists.close_mirror =
                    mirror_positions(&row_lists.close, &lists.close, "Close")?;
                lists.far_mirror = mirror_positions(&lists.far, &row_lists.far, "Far")?;
                lists.close_mirror = mirror_positions(&lists.close, &row_lists.close, "Close")?;
                lists.notransition = notransition(col, &lists.far);
                Some(lists)
            }
            None => {
                row_lists.far_mirror = mirror_positions(&row_lists.far, &row_lists.far, "Far")?;
                row_lists.close_mirror =
                    mirror_positions(&row_lists.close, &row_lists.close, "Close")?;
                None
            }
        };
        row_lists.notransition = notransition(&row_tree, &row_lists.far);

        let queue = build_queue(&row_tree, col_tree.as_ref());

        let problem = Self {
            kernel,
            row_tree,
            col_tree,
            row_lists,
            col_lists,
            queue,
        };
        log::debug!(
            "{:?}: {} far blocks, {} close blocks",
            problem,
            problem.row_lists.far.iter().map(|l| l.len()).sum::<usize>(),
            problem.row_lists.close.iter().map(|l| l.len()).sum::<usize>()
        );
        Ok(problem)
    }

    fn lists(&self, side: Side) -> &BlockLists {
        match (side, &self.col_lists) {
            (Side::Col, Some(lists)) => lists,
            _ => &self.row_lists,
        }
    }

    /// The kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Evaluate a block of the kernel.
    pub fn block(&self, rows: &[usize], cols: &[usize]) -> RlstArray<T, 2> {
        self.kernel.block(rows, cols)
    }

    /// Number of rows and columns of the operator.
    pub fn shape(&self) -> [usize; 2] {
        [self.row_tree.size(), self.tree(Side::Col).size()]
    }

    /// Check if rows and columns share one tree and the kernel is symmetric.
    pub fn is_symmetric(&self) -> bool {
        self.col_tree.is_none()
    }

    /// Cluster tree of one side.
    pub fn tree(&self, side: Side) -> &ClusterTree<T> {
        match (side, &self.col_tree) {
            (Side::Col, Some(tree)) => tree,
            _ => &self.row_tree,
        }
    }

    /// Admissible (far) neighbours of a node; ids refer to the dual tree.
    pub fn far(&self, side: Side, node: usize) -> &[usize] {
        &self.lists(side).far[node]
    }

    /// Close neighbours of a node; ids refer to the dual tree.
    pub fn close(&self, side: Side, node: usize) -> &[usize] {
        &self.lists(side).close[node]
    }

    /// For the `k`-th far neighbour `j` of `node`, the position of `node` in the far list of `j`.
    pub fn far_mirror(&self, side: Side, node: usize) -> &[usize] {
        &self.lists(side).far_mirror[node]
    }

    /// For the `k`-th close neighbour `j` of `node`, the position of `node` in the close list of `j`.
    pub fn close_mirror(&self, side: Side, node: usize) -> &[usize] {
        &self.lists(side).close_mirror[node]
    }

    /// Check if a node takes no part in the far field (neither it nor an ancestor has far
    /// neighbours).
    pub fn notransition(&self, side: Side, node: usize) -> bool {
        self.lists(side).notransition[node]
    }

    /// Traversal queue: per-level batches of `(side, node)` pairs, deepest level first.
    pub fn queue(&self) -> &[Vec<(Side, usize)>] {
        &self.queue
    }

    /// Nodes of one tree in queue order, children before parents.
    ///
    /// Reverse the iterator for a top-down traversal.
    pub fn queue_nodes(&self, side: Side) -> impl DoubleEndedIterator<Item = usize> + '_ {
        let side = if self.is_symmetric() { Side::Row } else { side };
        self.queue
            .iter()
            .flatten()
            .filter(move |(s, _)| *s == side)
            .map(|&(_, node)| node)
    }

    /// Sides that carry their own data: both for general problems, only rows if symmetric.
    pub fn sides(&self) -> &'static [Side] {
        if self.is_symmetric() {
            &[Side::Row]
        } else {
            &[Side::Row, Side::Col]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kernel::PointKernel;

    fn points(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
    }

    fn symmetric_problem(
        n: usize,
        block_size: usize,
    ) -> Problem<f64, PointKernel<f64, fn(&[f64], &[f64]) -> f64>> {
        let pts = points(n);
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 1).unwrap();
        let tree = ClusterTree::from_points(&pts, 1, block_size).unwrap();
        Problem::symmetric(kernel, tree, Admissibility::default()).unwrap()
    }

    #[test]
    fn test_block_partition_covers_matrix() {
        let problem = symmetric_problem(64, 8);
        let tree = problem.tree(Side::Row);
        let mut covered = vec![0usize; 64 * 64];
        for i in 0..tree.nnodes() {
            for &j in problem.far(Side::Row, i).iter().chain(problem.close(Side::Row, i)) {
                for &r in tree.index(i) {
                    for &c in tree.index(j) {
                        covered[r + 64 * c] += 1;
                    }
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_far_lists_are_symmetric() {
        let problem = symmetric_problem(64, 8);
        for i in 0..problem.tree(Side::Row).nnodes() {
            for (k, &j) in problem.far(Side::Row, i).iter().enumerate() {
                let m = problem.far_mirror(Side::Row, i)[k];
                assert_eq!(problem.far(Side::Col, j)[m], i);
            }
        }
    }

    #[test]
    fn test_notransition() {
        let problem = symmetric_problem(64, 8);
        // Root and the two halves have no admissible blocks.
        for node in 0..3 {
            assert!(problem.notransition(Side::Row, node));
        }
        for node in 3..15 {
            assert!(!problem.notransition(Side::Row, node));
        }
        assert!(!problem.far(Side::Row, 3).is_empty());
    }

    #[test]
    fn test_queue_orders_children_first() {
        let pts = points(40);
        let other = (0..30).map(|i| 2.0 + i as f64 / 29.0).collect::<Vec<_>>();
        let kernel = PointKernel::regularised_inverse_distance(&pts, &other, 1).unwrap();
        let row = ClusterTree::from_points(&pts, 1, 5).unwrap();
        let col = ClusterTree::from_points(&other, 1, 5).unwrap();
        let problem = Problem::new(kernel, row, col, Admissibility::default()).unwrap();
        assert!(!problem.is_symmetric());
        assert_eq!(problem.shape(), [40, 30]);

        let mut position = std::collections::HashMap::new();
        for (b, batch) in problem.queue().iter().enumerate() {
            for &entry in batch {
                position.insert(entry, b);
            }
        }
        for side in [Side::Row, Side::Col] {
            let tree = problem.tree(side);
            assert_eq!(
                position.keys().filter(|(s, _)| *s == side).count(),
                tree.nnodes()
            );
            for node in 1..tree.nnodes() {
                let parent = tree.parent(node).unwrap();
                assert!(position[&(side, node)] < position[&(side, parent)]);
            }
        }
        let up = problem.queue_nodes(Side::Col).collect::<Vec<_>>();
        assert_eq!(up.len(), problem.tree(Side::Col).nnodes());
        assert_eq!(up.last(), Some(&0));
        assert_eq!(problem.queue_nodes(Side::Col).next_back(), Some(0));
        // Well separated clusters are admissible at the root.
        assert_eq!(problem.far(Side::Row, 0), &[0]);
        assert_eq!(problem.far(Side::Col, 0), &[0]);
    }

    #[test]
    fn test_from_lists_rejects_bad_input() {
        let pts = points(8);
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 1).unwrap();
        let tree = ClusterTree::from_points(&pts, 1, 4).unwrap();
        // Asymmetric lists for a symmetric problem
        let far = vec![vec![], vec![2], vec![]];
        let close = vec![vec![], vec![1], vec![1, 2]];
        assert!(matches!(
            Problem::from_lists(kernel, tree, None, far, close),
            Err(H2Error::Construction(_))
        ));
    }
}
