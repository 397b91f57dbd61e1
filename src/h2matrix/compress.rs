//! Recompression of nested bases
use super::{H2Matrix, MemoryParts, SideData, Transfer};
use crate::linalg::{
    hstack, matmul, matmul_nt, matmul_tn, orthogonalise, row_range, scale_cols, select_cols, svd,
    vstack,
};
use crate::traits::Kernel;
use crate::types::{BlockList, H2Error, H2Result, H2Type, MemType, RealScalar, RlstArray, Side};
use rlst::Shape;

/// Interaction blocks of one side and of its dual side.
///
/// For symmetric matrices there is only one list, which serves as both.
struct Interactions<'m, T: RealScalar> {
    own: &'m mut BlockList<T>,
    dual: Option<&'m mut BlockList<T>>,
}

impl<T: RealScalar> Interactions<'_, T> {
    fn dual(&mut self) -> &mut BlockList<T> {
        match self.dual.as_mut() {
            Some(dual) => &mut **dual,
            None => &mut *self.own,
        }
    }
}

/// Transfer matrices of one side and the interaction blocks of both sides.
fn split<'m, T: RealScalar>(
    own: &'m mut SideData<T>,
    dual: Option<&'m mut SideData<T>>,
) -> H2Result<(&'m mut Vec<Transfer<T>>, Interactions<'m, T>)> {
    let missing = || H2Error::Construction("Compression requires stored interaction blocks".to_string());
    let dual = match dual {
        Some(data) => Some(data.interaction.as_mut().ok_or_else(missing)?),
        None => None,
    };
    let blocks = own.interaction.as_mut().ok_or_else(missing)?;
    Ok((&mut own.transfer, Interactions { own: blocks, dual }))
}

impl<T: RealScalar, K: Kernel<T = T>> H2Matrix<'_, T, K> {
    /// Recompress the matrix with relative tolerance `tau`.
    ///
    /// Every basis is truncated to the singular values `s[l] >= tau * s[0]` of the node's
    /// interaction blocks and inherited parent weights. Afterwards the transfer matrices have
    /// orthonormal columns, basis indices are discarded and the representation is [H2Type::H2].
    pub fn svdcompress(&mut self, tau: T) -> H2Result<()> {
        if tau <= T::zero() || tau >= T::one() {
            log::warn!("Compression tolerance {:?} is outside (0, 1)", tau);
        }
        if self.mem_type == MemType::Low {
            self.store_blocks()?;
        }
        let before = self.nbytes(MemoryParts::default());

        if self.is_symmetric() {
            self.orthogonalise(Side::Row)?;
            self.compress(Side::Row, tau)?;
            self.orthogonalise(Side::Row)?;
        } else {
            self.orthogonalise(Side::Row)?;
            self.orthogonalise(Side::Col)?;
            self.compress(Side::Col, tau)?;
            self.orthogonalise(Side::Col)?;
            self.compress(Side::Row, tau)?;
            self.orthogonalise(Side::Row)?;
        }

        self.row.basis = None;
        if let Some(col) = self.col.as_mut() {
            col.basis = None;
        }
        self.h2_type = H2Type::H2;
        self.normalise_inactive();

        log::info!(
            "Recompressed with tau = {:?}: {} bytes -> {} bytes, maximum rank {}",
            tau,
            before,
            self.nbytes(MemoryParts::default()),
            self.problem
                .sides()
                .iter()
                .flat_map(|&side| self.ranks(side))
                .max()
                .unwrap_or(0)
        );
        Ok(())
    }

    /// Bottom-up sweep replacing every transfer matrix by an orthonormal factor.
    ///
    /// The triangular-like factor of each node is folded into its interaction blocks, their
    /// mirrored dual blocks and the parent's transfer matrix.
    fn orthogonalise(&mut self, side: Side) -> H2Result<()> {
        let problem = self.problem;
        let tree = problem.tree(side);
        let (own, dual) = self.split_mut(side);
        let (transfer, mut blocks) = split(own, dual)?;

        let mut factors: Vec<Option<RlstArray<T, 2>>> = (0..tree.nnodes()).map(|_| None).collect();
        for node in problem.queue_nodes(side) {
            if problem.notransition(side, node) {
                continue;
            }
            let dense = transfer[node].to_dense();
            let local = if tree.is_leaf(node) {
                dense
            } else {
                let ncols = dense.shape()[1];
                let mut offset = 0;
                let mut parts = vec![];
                for &child in tree.children(node) {
                    let rank = match &factors[child] {
                        Some(r) => r.shape()[1],
                        None => transfer[child].rank(),
                    };
                    let slice = row_range(&dense, offset, offset + rank);
                    parts.push(match &factors[child] {
                        Some(r) => matmul(r, &slice),
                        None => slice,
                    });
                    offset += rank;
                }
                vstack(&parts.iter().collect::<Vec<_>>(), ncols)
            };

            let (q, r) = orthogonalise(&local)?;
            transfer[node] = Transfer::Matrix(q);
            let far = problem.far(side, node);
            let mirror = problem.far_mirror(side, node);
            for (k, (&j, &m)) in far.iter().zip(mirror).enumerate() {
                blocks.own[node][k] = matmul(&r, &blocks.own[node][k]);
                let dual = blocks.dual();
                dual[j][m] = matmul_nt(&dual[j][m], &r);
            }
            factors[node] = Some(r);
        }
        Ok(())
    }

    /// Top-down sweep truncating every basis of one side.
    fn compress(&mut self, side: Side, tau: T) -> H2Result<()> {
        let problem = self.problem;
        let tree = problem.tree(side);
        let (own, dual) = self.split_mut(side);
        let (transfer, mut blocks) = split(own, dual)?;

        let mut weights = vec![vec![]; tree.nnodes()];
        for node in problem.queue_nodes(side).rev() {
            if problem.notransition(side, node) {
                continue;
            }
            let rank = transfer[node].rank();

            let parent = tree
                .parent(node)
                .filter(|&p| !problem.notransition(side, p));
            let inherited = parent.map(|p| {
                let offset = tree
                    .children(p)
                    .iter()
                    .take_while(|&&c| c != node)
                    .map(|&c| transfer[c].rank())
                    .sum::<usize>();
                (p, offset)
            });
            let parent_part = inherited.map(|(p, offset)| {
                let slice = row_range(&transfer[p].to_dense(), offset, offset + rank);
                scale_cols(&slice, &weights[p])
            });
            let columns = parent_part
                .iter()
                .chain(blocks.own[node].iter())
                .collect::<Vec<_>>();
            let (u, s, _) = svd(&hstack(&columns, rank))?;

            let threshold = s.first().map(|&s0| tau * s0).unwrap_or(T::zero());
            let new_rank = s.iter().take_while(|&&v| v >= threshold).count();
            let p = select_cols(&u, &(0..new_rank).collect::<Vec<_>>());

            transfer[node] = Transfer::Matrix(matmul(&transfer[node].to_dense(), &p));
            let far = problem.far(side, node);
            let mirror = problem.far_mirror(side, node);
            for (k, (&j, &m)) in far.iter().zip(mirror).enumerate() {
                blocks.own[node][k] = matmul_tn(&p, &blocks.own[node][k]);
                let dual = blocks.dual();
                dual[j][m] = matmul(&dual[j][m], &p);
            }
            if let Some((p_node, offset)) = inherited {
                let dense = transfer[p_node].to_dense();
                let [nrows, ncols] = dense.shape();
                let before = row_range(&dense, 0, offset);
                let projected = matmul_tn(&p, &row_range(&dense, offset, offset + rank));
                let after = row_range(&dense, offset + rank, nrows);
                transfer[p_node] = Transfer::Matrix(vstack(&[&before, &projected, &after], ncols));
            }
            weights[node] = s[..new_rank].to_vec();
        }
        Ok(())
    }
}
