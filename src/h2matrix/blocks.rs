//! Interaction and close blocks: stored or evaluated on demand
use super::SideData;
use crate::linalg::{gemm_acc, transpose};
use crate::problem::Problem;
use crate::traits::Kernel;
use crate::types::{BlockList, H2Error, H2Result, RealScalar, RlstArray, Side};
use rayon::prelude::*;

/// Source of the interaction and close blocks used by matrix products.
pub(crate) trait BlockProvider<T: RealScalar> {
    /// Add `B x` to `y`, where `B` is the interaction block of `node` and its `k`-th far neighbour.
    fn far_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    );

    /// Add `C x` to `y`, where `C` is the close block of `node` and its `k`-th close neighbour.
    fn close_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    );
}

/// Blocks stored in the matrix.
pub(crate) struct CachedBlockProvider<'m, T: RealScalar> {
    interaction: [&'m BlockList<T>; 2],
    close: [&'m BlockList<T>; 2],
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Row => 0,
        Side::Col => 1,
    }
}

impl<'m, T: RealScalar> CachedBlockProvider<'m, T> {
    pub(crate) fn new(row: &'m SideData<T>, col: &'m SideData<T>) -> H2Result<Self> {
        match (&row.interaction, &col.interaction, &row.close, &col.close) {
            (Some(ri), Some(ci), Some(rc), Some(cc)) => Ok(Self {
                interaction: [ri, ci],
                close: [rc, cc],
            }),
            _ => Err(H2Error::Construction(
                "Stored blocks requested but not materialised".to_string(),
            )),
        }
    }
}

impl<T: RealScalar> BlockProvider<T> for CachedBlockProvider<'_, T> {
    fn far_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    ) {
        gemm_acc(y, &self.interaction[side_index(side)][node][k], x);
    }

    fn close_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    ) {
        gemm_acc(y, &self.close[side_index(side)][node][k], x);
    }
}

/// Blocks evaluated from the kernel at basis indices (far field) and tree indices (near field).
pub(crate) struct ComputedBlockProvider<'m, T: RealScalar, K: Kernel<T = T>> {
    problem: &'m Problem<T, K>,
    basis: [&'m [Vec<usize>]; 2],
}

impl<'m, T: RealScalar, K: Kernel<T = T>> ComputedBlockProvider<'m, T, K> {
    pub(crate) fn new(
        problem: &'m Problem<T, K>,
        row: &'m SideData<T>,
        col: &'m SideData<T>,
    ) -> H2Result<Self> {
        match (&row.basis, &col.basis) {
            (Some(rb), Some(cb)) => Ok(Self {
                problem,
                basis: [rb.as_slice(), cb.as_slice()],
            }),
            _ => Err(H2Error::Construction(
                "On-the-fly evaluation requires basis indices".to_string(),
            )),
        }
    }

    /// Kernel at the basis indices of `node` and of its dual node `other`.
    pub(crate) fn far_block(&self, side: Side, node: usize, other: usize) -> RlstArray<T, 2> {
        let own = &self.basis[side_index(side)][node];
        let dual = &self.basis[side_index(side.dual())][other];
        match side {
            Side::Row => self.problem.block(own, dual),
            Side::Col => transpose(&self.problem.block(dual, own)),
        }
    }

    /// Kernel at the indices of `node` and of its dual node `other`.
    pub(crate) fn close_block(&self, side: Side, node: usize, other: usize) -> RlstArray<T, 2> {
        let own = self.problem.tree(side).index(node);
        let dual = self.problem.tree(side.dual()).index(other);
        match side {
            Side::Row => self.problem.block(own, dual),
            Side::Col => transpose(&self.problem.block(dual, own)),
        }
    }
}

impl<T: RealScalar, K: Kernel<T = T>> BlockProvider<T> for ComputedBlockProvider<'_, T, K> {
    fn far_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    ) {
        let other = self.problem.far(side, node)[k];
        gemm_acc(y, &self.far_block(side, node, other), x);
    }

    fn close_gemm(
        &self,
        side: Side,
        node: usize,
        k: usize,
        x: &RlstArray<T, 2>,
        y: &mut RlstArray<T, 2>,
    ) {
        let other = self.problem.close(side, node)[k];
        gemm_acc(y, &self.close_block(side, node, other), x);
    }
}

/// Derive the blocks of the dual side: `out[j][m] = blocks[i][k]^T` where `j` is the `k`-th
/// neighbour of `i` and `i` is the `m`-th neighbour of `j`.
pub(crate) fn transpose_blocks<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    side: Side,
    blocks: &BlockList<T>,
    far: bool,
) -> BlockList<T> {
    let dual = side.dual();
    (0..problem.tree(dual).nnodes())
        .map(|j| {
            let (list, mirror) = if far {
                (problem.far(dual, j), problem.far_mirror(dual, j))
            } else {
                (problem.close(dual, j), problem.close_mirror(dual, j))
            };
            list.iter()
                .zip(mirror)
                .map(|(&i, &k)| transpose(&blocks[i][k]))
                .collect()
        })
        .collect()
}

/// Evaluate and store the interaction and close blocks of both sides.
///
/// Row-side blocks are evaluated from the kernel; column-side blocks are their transposes and
/// are only stored for non-symmetric problems.
pub(crate) fn materialise<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    row: &mut SideData<T>,
    col: Option<&mut SideData<T>>,
) -> H2Result<()> {
    let (interaction, close) = {
        let provider = ComputedBlockProvider::new(problem, &*row, col.as_deref().unwrap_or(&*row))?;
        let nnodes = problem.tree(Side::Row).nnodes();
        let interaction = (0..nnodes)
            .into_par_iter()
            .map(|i| {
                problem
                    .far(Side::Row, i)
                    .iter()
                    .map(|&j| provider.far_block(Side::Row, i, j))
                    .collect()
            })
            .collect::<BlockList<T>>();
        let close = (0..nnodes)
            .into_par_iter()
            .map(|i| {
                problem
                    .close(Side::Row, i)
                    .iter()
                    .map(|&j| provider.close_block(Side::Row, i, j))
                    .collect()
            })
            .collect::<BlockList<T>>();
        (interaction, close)
    };
    if let Some(col) = col {
        col.interaction = Some(transpose_blocks(problem, Side::Row, &interaction, true));
        col.close = Some(transpose_blocks(problem, Side::Row, &close, false));
    }
    row.interaction = Some(interaction);
    row.close = Some(close);
    Ok(())
}
