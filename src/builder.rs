//! Multicharge Barnes-Hut (MCBH) construction of H2-matrices
use crate::h2matrix::{H2Matrix, H2MatrixParts, Transfer};
use crate::linalg::transpose;
use crate::pivot::RrluSelector;
use crate::problem::Problem;
use crate::traits::{Kernel, PivotSelector};
use crate::types::{H2Result, RealScalar, RlstArray, Side};
use itertools::Itertools;
use rlst::RawAccess;
use std::time::{Duration, Instant};

/// Options of the MCBH construction.
#[derive(Debug, Clone, Copy)]
pub struct McbhOptions<T: RealScalar> {
    /// Relative tolerance of the pivot selection
    pub tau: T,
    /// Number of additional top-down and bottom-up sweeps
    pub iters: usize,
    /// Evaluate interaction and close blocks on demand instead of storing them
    pub onfly: bool,
}

impl<T: RealScalar> Default for McbhOptions<T> {
    fn default() -> Self {
        Self {
            tau: num::cast(1e-6).unwrap_or_else(<T as num::Float>::epsilon),
            iters: 1,
            onfly: false,
        }
    }
}

/// Counters collected during construction.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Number of kernel evaluations
    pub kernel_calls: usize,
    /// Number of kernel entries computed
    pub elements: usize,
    /// Time spent selecting pivots
    pub pivot_time: Duration,
    /// Number of completed sweeps
    pub sweeps: usize,
}

/// State of the construction sweeps.
///
/// Side data is indexed by [Sweep::slot]; symmetric problems only use the row slot.
struct Sweep<'b, T: RealScalar, K: Kernel<T = T>, P: PivotSelector<T>> {
    problem: &'b Problem<T, K>,
    selector: &'b P,
    tau: T,
    basis: [Vec<Option<Vec<usize>>>; 2],
    transfer: [Vec<Transfer<T>>; 2],
    prebasis: [Vec<Vec<usize>>; 2],
    stats: BuildStats,
}

impl<'b, T: RealScalar, K: Kernel<T = T>, P: PivotSelector<T>> Sweep<'b, T, K, P> {
    fn new(problem: &'b Problem<T, K>, selector: &'b P, tau: T) -> Self {
        let nodes = |side| problem.tree(side).nnodes();
        Self {
            problem,
            selector,
            tau,
            basis: [vec![None; nodes(Side::Row)], vec![None; nodes(Side::Col)]],
            transfer: [Side::Row, Side::Col].map(|side| {
                (0..nodes(side)).map(|_| Transfer::Identity(0)).collect()
            }),
            prebasis: [vec![vec![]; nodes(Side::Row)], vec![vec![]; nodes(Side::Col)]],
            stats: BuildStats::default(),
        }
    }

    fn slot(&self, side: Side) -> usize {
        match side {
            Side::Col if !self.problem.is_symmetric() => 1,
            _ => 0,
        }
    }

    /// Kernel block with rows (`Row` side) or columns (`Col` side) `own`, oriented so that the
    /// rows always belong to the node.
    fn evaluate(&mut self, side: Side, own: &[usize], other: &[usize]) -> RlstArray<T, 2> {
        self.stats.kernel_calls += 1;
        self.stats.elements += own.len() * other.len();
        match side {
            Side::Row => self.problem.block(own, other),
            Side::Col => transpose(&self.problem.block(other, own)),
        }
    }

    /// Current basis of a node, or its full index set if not yet assigned.
    fn basis_or_index(&self, side: Side, node: usize) -> &[usize] {
        match &self.basis[self.slot(side)][node] {
            Some(basis) => basis.as_slice(),
            None => self.problem.tree(side).index(node),
        }
    }

    /// Far neighbours' bases followed by the inherited prebasis, without repetitions.
    fn far_candidates(&self, side: Side, node: usize) -> Vec<usize> {
        let dual = side.dual();
        self.problem
            .far(side, node)
            .iter()
            .flat_map(|&j| self.basis_or_index(dual, j).iter().copied())
            .chain(self.prebasis[self.slot(side)][node].iter().copied())
            .unique()
            .collect()
    }

    fn factor_up(&mut self, side: Side, node: usize) {
        let problem = self.problem;
        let tree = problem.tree(side);
        let slot = self.slot(side);
        let own = if tree.is_leaf(node) {
            tree.index(node).to_vec()
        } else {
            tree.children(node)
                .iter()
                .flat_map(|&c| self.basis_or_index(side, c).iter().copied())
                .collect::<Vec<_>>()
        };
        let candidates = if problem.notransition(side, node) {
            vec![]
        } else {
            self.far_candidates(side, node)
        };

        if candidates.is_empty() {
            self.transfer[slot][node] = Transfer::Identity(own.len());
            self.basis[slot][node] = Some(own);
            return;
        }
        let mat = self.evaluate(side, &own, &candidates);
        let start = Instant::now();
        let (pivots, interpolation) = self.selector.select_rows(&mat, self.tau);
        self.stats.pivot_time += start.elapsed();

        self.basis[slot][node] = Some(pivots.iter().map(|&p| own[p]).collect());
        self.transfer[slot][node] = Transfer::Matrix(interpolation);
    }

    fn factor_down(&mut self, side: Side, node: usize) {
        let problem = self.problem;
        let tree = problem.tree(side);
        if tree.is_leaf(node) {
            return;
        }
        let slot = self.slot(side);
        let candidates = self.far_candidates(side, node);
        let basis = self.basis_or_index(side, node).to_vec();
        let handed_down = if candidates.len() <= basis.len() {
            candidates
        } else {
            let mat = self.evaluate(side, &basis, &candidates);
            let start = Instant::now();
            let (cols, _) = self.selector.select_cols(&mat, self.tau);
            self.stats.pivot_time += start.elapsed();
            cols.iter().map(|&c| candidates[c]).collect()
        };
        for &child in tree.children(node) {
            self.prebasis[slot][child] = handed_down.clone();
        }
    }

    fn up_sweep(&mut self) {
        let problem = self.problem;
        for &(side, node) in problem.queue().iter().flatten() {
            self.factor_up(side, node);
        }
        self.stats.sweeps += 1;
        log::debug!("Bottom-up sweep {} done", self.stats.sweeps);
    }

    fn down_sweep(&mut self) {
        let problem = self.problem;
        for &(side, node) in problem.queue().iter().flatten().rev() {
            self.factor_down(side, node);
        }
        self.stats.sweeps += 1;
        log::debug!("Top-down sweep {} done", self.stats.sweeps);
    }

    /// Transfer matrices and basis indices of one side.
    fn take(&mut self, slot: usize) -> (Vec<Transfer<T>>, Vec<Vec<usize>>) {
        let transfer = std::mem::take(&mut self.transfer[slot]);
        let basis = std::mem::take(&mut self.basis[slot])
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        (transfer, basis)
    }
}

/// Builder of H2-matrices by the MCBH method.
///
/// Node bases are selected from kernel evaluations by a bottom-up sweep, refined by `iters`
/// pairs of top-down and bottom-up sweeps in which every node also represents the far
/// neighbours of its ancestors.
pub struct McbhBuilder<'a, T: RealScalar, K: Kernel<T = T>, P: PivotSelector<T> = RrluSelector> {
    problem: &'a Problem<T, K>,
    selector: P,
    options: McbhOptions<T>,
}

impl<'a, T: RealScalar, K: Kernel<T = T>> McbhBuilder<'a, T, K> {
    /// Create a builder with default options and pivot selection.
    pub fn new(problem: &'a Problem<T, K>) -> Self {
        Self {
            problem,
            selector: RrluSelector::new(),
            options: McbhOptions::default(),
        }
    }
}

impl<'a, T: RealScalar, K: Kernel<T = T>, P: PivotSelector<T>> McbhBuilder<'a, T, K, P> {
    /// Use a different pivot selector.
    pub fn with_selector<Q: PivotSelector<T>>(self, selector: Q) -> McbhBuilder<'a, T, K, Q> {
        McbhBuilder {
            problem: self.problem,
            selector,
            options: self.options,
        }
    }

    /// Set the relative tolerance of the pivot selection
    pub fn tau(&mut self, tau: T) {
        if tau <= T::zero() || tau >= T::one() {
            log::warn!("Construction tolerance {:?} is outside (0, 1)", tau);
        }
        self.options.tau = tau;
    }

    /// Set the number of refinement iterations
    pub fn iters(&mut self, iters: usize) {
        self.options.iters = iters;
    }

    /// Set whether blocks are evaluated on demand
    pub fn onfly(&mut self, onfly: bool) {
        self.options.onfly = onfly;
    }

    /// Options
    pub fn options(&self) -> &McbhOptions<T> {
        &self.options
    }

    /// Build the H2-matrix.
    pub fn build(&self) -> H2Result<H2Matrix<'a, T, K>> {
        self.build_with_stats().map(|(matrix, _)| matrix)
    }

    /// Build the H2-matrix and report construction statistics.
    pub fn build_with_stats(&self) -> H2Result<(H2Matrix<'a, T, K>, BuildStats)> {
        let problem = self.problem;
        let mut sweep = Sweep::new(problem, &self.selector, self.options.tau);
        sweep.up_sweep();
        for _ in 0..self.options.iters {
            sweep.down_sweep();
            sweep.up_sweep();
        }

        let (row_transfer, row_basis) = sweep.take(0);
        let parts = if problem.is_symmetric() {
            H2MatrixParts {
                row_transfer,
                row_basis: Some(row_basis),
                ..Default::default()
            }
        } else {
            let (col_transfer, col_basis) = sweep.take(1);
            H2MatrixParts {
                row_transfer,
                col_transfer: Some(col_transfer),
                row_basis: Some(row_basis),
                col_basis: Some(col_basis),
                ..Default::default()
            }
        };
        let mut stats = sweep.stats;
        let mut matrix = H2Matrix::from_parts(problem, parts)?;

        if !self.options.onfly {
            matrix.store_blocks()?;
            for blocks in [matrix.interaction(Side::Row), matrix.close(Side::Row)]
                .into_iter()
                .flatten()
            {
                stats.kernel_calls += blocks.iter().map(|list| list.len()).sum::<usize>();
                stats.elements += blocks.iter().flatten().map(|b| b.data().len()).sum::<usize>();
            }
        }

        log::info!(
            "MCBH construction: {} kernel calls, {} elements, {:?} selecting pivots, {} sweeps, maximum rank {}",
            stats.kernel_calls,
            stats.elements,
            stats.pivot_time,
            stats.sweeps,
            problem
                .sides()
                .iter()
                .flat_map(|&side| matrix.ranks(side))
                .max()
                .unwrap_or(0)
        );
        Ok((matrix, stats))
    }
}

/// Build an H2-matrix by the MCBH method.
///
/// `tau` is the relative tolerance of the pivot selection, `iters` the number of refinement
/// iterations, and `onfly` selects on-demand evaluation of interaction and close blocks.
pub fn mcbh<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    tau: T,
    iters: usize,
    onfly: bool,
) -> H2Result<H2Matrix<'_, T, K>> {
    let mut builder = McbhBuilder::new(problem);
    builder.tau(tau);
    builder.iters(iters);
    builder.onfly(onfly);
    builder.build()
}
