//! Conversion between representation types and memory models
use super::{materialise, H2Matrix, Transfer};
use crate::linalg::{matmul, row_range, select_rows, vstack};
use crate::pivot::RrluSelector;
use crate::traits::{Kernel, PivotSelector};
use crate::types::{H2Result, H2Type, MemType, RealScalar, RlstArray, Side};
use rlst::Shape;

impl<T: RealScalar, K: Kernel<T = T>> H2Matrix<'_, T, K> {
    /// Convert to the MCBH representation, with blocks stored (`onfly == false`) or evaluated on
    /// demand (`onfly == true`).
    ///
    /// An MCBH matrix only switches its memory model. An H2 matrix first selects basis indices
    /// for every node from its transfer matrices. Calls that do not change the state do nothing.
    pub fn mcbh(&mut self, onfly: bool) -> H2Result<()> {
        self.mcbh_with(&RrluSelector::new(), onfly)
    }

    /// As [H2Matrix::mcbh], selecting basis indices with a given pivot selector.
    pub fn mcbh_with<P: PivotSelector<T>>(&mut self, selector: &P, onfly: bool) -> H2Result<()> {
        match (self.h2_type, self.mem_type, onfly) {
            (H2Type::Mcbh, MemType::Low, true) | (H2Type::Mcbh, MemType::Full, false) => {
                log::debug!("Matrix is already in the requested state");
            }
            (H2Type::Mcbh, MemType::Low, false) => self.store_blocks()?,
            (H2Type::Mcbh, MemType::Full, true) => self.discard_blocks(),
            (H2Type::H2, _, _) => {
                let tol = num::Float::sqrt(<T as num::Float>::epsilon());
                for side in [Side::Col, Side::Row] {
                    if side == Side::Col || !self.is_symmetric() {
                        self.select_basis(side, selector, tol);
                    }
                }
                self.h2_type = H2Type::Mcbh;
                self.normalise_inactive();
                if onfly {
                    self.discard_blocks();
                } else {
                    self.store_blocks()?;
                }
                log::info!(
                    "Converted to MCBH representation ({:?} memory)",
                    self.mem_type
                );
            }
        }
        Ok(())
    }

    /// Evaluate and store the interaction and close blocks.
    pub(crate) fn store_blocks(&mut self) -> H2Result<()> {
        let problem = self.problem;
        let (row, col) = self.split_mut(Side::Row);
        materialise(problem, row, col)?;
        self.mem_type = MemType::Full;
        Ok(())
    }

    /// Drop the interaction and close blocks, evaluating them from the kernel from now on.
    fn discard_blocks(&mut self) {
        for data in std::iter::once(&mut self.row).chain(self.col.as_mut()) {
            data.interaction = None;
            data.close = None;
        }
        self.mem_type = MemType::Low;
    }

    /// Bottom-up selection of basis indices reproducing the nested basis of one side.
    ///
    /// At a leaf the rows of the transfer matrix are candidates. At an internal node the
    /// candidates are the children's basis indices and the rows are the transfer matrix
    /// expressed in the children's reduced bases.
    fn select_basis<P: PivotSelector<T>>(&mut self, side: Side, selector: &P, tol: T) {
        let problem = self.problem;
        let tree = problem.tree(side);
        let data = self.side_mut(side);

        let mut basis = vec![vec![]; tree.nnodes()];
        let mut reduced: Vec<Option<RlstArray<T, 2>>> = (0..tree.nnodes()).map(|_| None).collect();
        for node in problem.queue_nodes(side) {
            if problem.notransition(side, node) {
                continue;
            }
            let dense = data.transfer[node].to_dense();
            let (candidates, local) = if tree.is_leaf(node) {
                (tree.index(node).to_vec(), dense)
            } else {
                let ncols = dense.shape()[1];
                let mut candidates = vec![];
                let mut parts = vec![];
                let mut offset = 0;
                for &child in tree.children(node) {
                    candidates.extend_from_slice(&basis[child]);
                    let rank = match &reduced[child] {
                        Some(r) => r.shape()[1],
                        None => data.transfer[child].rank(),
                    };
                    let slice = row_range(&dense, offset, offset + rank);
                    parts.push(match &reduced[child] {
                        Some(r) => matmul(r, &slice),
                        None => slice,
                    });
                    offset += rank;
                }
                (candidates, vstack(&parts.iter().collect::<Vec<_>>(), ncols))
            };

            let (pivots, interpolation) = selector.select_rows(&local, tol);
            basis[node] = pivots.iter().map(|&p| candidates[p]).collect();
            reduced[node] = Some(select_rows(&local, &pivots));
            data.transfer[node] = Transfer::Matrix(interpolation);
        }
        data.basis = Some(basis);
    }
}

#[cfg(test)]
mod test {
    use crate::builder::mcbh;
    use crate::h2matrix::MemoryParts;
    use crate::kernel::PointKernel;
    use crate::problem::{Admissibility, Problem};
    use crate::tree::ClusterTree;
    use crate::types::{H2Type, MemType, Side};

    fn relative_error(a: &[f64], b: &[f64]) -> f64 {
        let diff = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>();
        let norm = b.iter().map(|y| y * y).sum::<f64>();
        (diff / norm).sqrt()
    }

    #[test]
    fn test_memory_toggle() {
        let pts = (0..64).map(|i| i as f64 / 63.0).collect::<Vec<_>>();
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 1).unwrap();
        let tree = ClusterTree::from_points(&pts, 1, 8).unwrap();
        let problem = Problem::symmetric(kernel, tree, Admissibility::default()).unwrap();
        let mut h2 = mcbh(&problem, 1e-7, 1, false).unwrap();
        let x = vec![1.0; 64];
        let reference = h2.dot(&x).unwrap();
        let full = h2.nbytes(MemoryParts::default());

        h2.mcbh(true).unwrap();
        assert_eq!(h2.mem_type(), MemType::Low);
        assert!(h2.interaction(Side::Row).is_none());
        assert!(h2.nbytes(MemoryParts::default()) < full);
        assert!(relative_error(&h2.dot(&x).unwrap(), &reference) < 1e-12);

        h2.mcbh(true).unwrap();
        assert_eq!(h2.mem_type(), MemType::Low);

        h2.mcbh(false).unwrap();
        assert_eq!(h2.mem_type(), MemType::Full);
        assert_eq!(h2.nbytes(MemoryParts::default()), full);
    }

    #[test]
    fn test_h2_to_mcbh() {
        let pts = (0..64).map(|i| i as f64 / 63.0).collect::<Vec<_>>();
        let other = (0..48).map(|i| 0.25 + i as f64 / 47.0).collect::<Vec<_>>();
        let kernel = PointKernel::regularised_inverse_distance(&pts, &other, 1).unwrap();
        let row = ClusterTree::from_points(&pts, 1, 8).unwrap();
        let col = ClusterTree::from_points(&other, 1, 8).unwrap();
        let problem = Problem::new(kernel, row, col, Admissibility::default()).unwrap();

        let mut h2 = mcbh(&problem, 1e-9, 1, false).unwrap();
        h2.svdcompress(1e-8).unwrap();
        assert_eq!(h2.h2_type(), H2Type::H2);
        let x = (0..48).map(|i| (i as f64 * 0.3).sin()).collect::<Vec<_>>();
        let reference = h2.dot(&x).unwrap();

        h2.mcbh(true).unwrap();
        assert_eq!(h2.h2_type(), H2Type::Mcbh);
        assert_eq!(h2.mem_type(), MemType::Low);
        for side in [Side::Row, Side::Col] {
            let basis = h2.basis(side).unwrap();
            for (b, rank) in basis.iter().zip(h2.ranks(side)) {
                assert_eq!(b.len(), rank);
            }
        }
        assert!(relative_error(&h2.dot(&x).unwrap(), &reference) < 1e-6);
    }
}
