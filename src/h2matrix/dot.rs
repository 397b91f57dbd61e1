//! Matrix products
use super::blocks::BlockProvider;
use super::H2Matrix;
use crate::linalg::{add_assign, from_column_major, row_range, scatter_add_rows, select_rows, vstack, zeros};
use crate::traits::{Kernel, LinearOperator};
use crate::types::{H2Error, H2Result, RealScalar, RlstArray, Side};
use rlst::{RawAccess, Shape};

/// Part of the operator applied by a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Full,
    Far,
    Close,
}

impl<T: RealScalar, K: Kernel<T = T>> H2Matrix<'_, T, K> {
    /// Upward pass: charges of every node of the input tree.
    fn upward(&self, side: Side, x: &RlstArray<T, 2>) -> Vec<RlstArray<T, 2>> {
        let tree = self.problem.tree(side);
        let transfer = self.transfer(side);
        let nrhs = x.shape()[1];
        let mut charges = transfer
            .iter()
            .map(|t| zeros([t.rank(), nrhs]))
            .collect::<Vec<_>>();
        for node in self.problem.queue_nodes(side) {
            if self.problem.notransition(side, node) {
                continue;
            }
            let local = if tree.is_leaf(node) {
                select_rows(x, tree.index(node))
            } else {
                let children = tree
                    .children(node)
                    .iter()
                    .map(|&c| &charges[c])
                    .collect::<Vec<_>>();
                vstack(&children, nrhs)
            };
            charges[node] = transfer[node].apply_t(&local);
        }
        charges
    }

    /// Downward pass: expand the potentials of every node of the output tree.
    fn downward(&self, side: Side, mut potentials: Vec<RlstArray<T, 2>>, nrhs: usize) -> RlstArray<T, 2> {
        let tree = self.problem.tree(side);
        let transfer = self.transfer(side);
        let mut y = zeros([tree.size(), nrhs]);
        for node in self.problem.queue_nodes(side).rev() {
            if self.problem.notransition(side, node) {
                continue;
            }
            let expanded = transfer[node].apply(&potentials[node]);
            if tree.is_leaf(node) {
                scatter_add_rows(&mut y, tree.index(node), &expanded);
            } else {
                let mut offset = 0;
                for &child in tree.children(node) {
                    let rank = transfer[child].rank();
                    add_assign(&mut potentials[child], &row_range(&expanded, offset, offset + rank));
                    offset += rank;
                }
            }
        }
        y
    }

    fn far_product(
        &self,
        out: Side,
        x: &RlstArray<T, 2>,
        provider: &dyn BlockProvider<T>,
    ) -> RlstArray<T, 2> {
        let nrhs = x.shape()[1];
        let charges = self.upward(out.dual(), x);
        let potentials = self
            .transfer(out)
            .iter()
            .enumerate()
            .map(|(node, t)| {
                let mut potential = zeros([t.rank(), nrhs]);
                for (k, &j) in self.problem.far(out, node).iter().enumerate() {
                    provider.far_gemm(out, node, k, &charges[j], &mut potential);
                }
                potential
            })
            .collect();
        self.downward(out, potentials, nrhs)
    }

    fn close_product(
        &self,
        out: Side,
        x: &RlstArray<T, 2>,
        provider: &dyn BlockProvider<T>,
    ) -> RlstArray<T, 2> {
        let nrhs = x.shape()[1];
        let tree = self.problem.tree(out);
        let dual_tree = self.problem.tree(out.dual());
        let mut y = zeros([tree.size(), nrhs]);
        for node in 0..tree.nnodes() {
            let close = self.problem.close(out, node);
            if close.is_empty() {
                continue;
            }
            let mut local = zeros([tree.index(node).len(), nrhs]);
            for (k, &j) in close.iter().enumerate() {
                provider.close_gemm(out, node, k, &select_rows(x, dual_tree.index(j)), &mut local);
            }
            scatter_add_rows(&mut y, tree.index(node), &local);
        }
        y
    }

    /// Apply a part of the operator (`out == Row`) or of its transpose (`out == Col`).
    fn product(&self, out: Side, part: Part, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        let expected = self.problem.tree(out.dual()).size();
        if x.shape()[0] != expected {
            return Err(H2Error::DimensionMismatch {
                expected,
                actual: x.shape()[0],
            });
        }
        let provider = self.block_provider()?;
        Ok(match part {
            Part::Far => self.far_product(out, x, provider.as_ref()),
            Part::Close => self.close_product(out, x, provider.as_ref()),
            Part::Full => {
                let mut y = self.far_product(out, x, provider.as_ref());
                add_assign(&mut y, &self.close_product(out, x, provider.as_ref()));
                y
            }
        })
    }

    fn vector_product(&self, out: Side, part: Part, x: &[T]) -> H2Result<Vec<T>> {
        let expected = self.problem.tree(out.dual()).size();
        if x.len() != expected {
            return Err(H2Error::DimensionMismatch {
                expected,
                actual: x.len(),
            });
        }
        let y = self.product(out, part, &from_column_major([x.len(), 1], x))?;
        Ok(y.data().to_vec())
    }

    /// Compute `A x`.
    pub fn dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Row, Part::Full, x)
    }

    /// Compute `A^T x`, the row vector `x^T A` returned as a vector.
    pub fn rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Col, Part::Full, x)
    }

    /// Compute the far-field part of `A x`.
    pub fn far_dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Row, Part::Far, x)
    }

    /// Compute the far-field part of `A^T x`.
    pub fn far_rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Col, Part::Far, x)
    }

    /// Compute the near-field part of `A x`.
    pub fn close_dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Row, Part::Close, x)
    }

    /// Compute the near-field part of `A^T x`.
    pub fn close_rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.vector_product(Side::Col, Part::Close, x)
    }

    /// Compute `A X` for a block of vectors.
    pub fn dot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Row, Part::Full, x)
    }

    /// Compute `A^T X` for a block of vectors.
    pub fn rdot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Col, Part::Full, x)
    }

    /// Compute the far-field part of `A X`.
    pub fn far_dot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Row, Part::Far, x)
    }

    /// Compute the far-field part of `A^T X`.
    pub fn far_rdot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Col, Part::Far, x)
    }

    /// Compute the near-field part of `A X`.
    pub fn close_dot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Row, Part::Close, x)
    }

    /// Compute the near-field part of `A^T X`.
    pub fn close_rdot_block(&self, x: &RlstArray<T, 2>) -> H2Result<RlstArray<T, 2>> {
        self.product(Side::Col, Part::Close, x)
    }
}

impl<T: RealScalar, K: Kernel<T = T>> LinearOperator<T> for H2Matrix<'_, T, K> {
    fn shape(&self) -> [usize; 2] {
        H2Matrix::shape(self)
    }

    fn dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        H2Matrix::dot(self, x)
    }

    fn rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        H2Matrix::rdot(self, x)
    }

    fn far_dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        H2Matrix::far_dot(self, x)
    }

    fn far_rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        H2Matrix::far_rdot(self, x)
    }
}

#[cfg(test)]
mod test {
    use crate::h2matrix::{H2Matrix, H2MatrixParts, Transfer};
    use crate::kernel::PointKernel;
    use crate::problem::{Admissibility, Problem};
    use crate::tree::ClusterTree;
    use crate::types::{H2Error, H2Type, MemType, Side};
    use approx::assert_relative_eq;
    use rlst::{RawAccess, Shape};

    type TestKernel = PointKernel<f64, fn(&[f64], &[f64]) -> f64>;

    fn problem(n: usize, symmetric: bool) -> Problem<f64, TestKernel> {
        let pts = (0..n).map(|i| i as f64 / (n - 1) as f64).collect::<Vec<_>>();
        let kernel = PointKernel::regularised_inverse_distance(&pts, &pts, 1).unwrap();
        let tree = ClusterTree::from_points(&pts, 1, 8).unwrap();
        if symmetric {
            Problem::symmetric(kernel, tree, Admissibility::default()).unwrap()
        } else {
            let col = ClusterTree::from_points(&pts, 1, 8).unwrap();
            Problem::new(kernel, tree, col, Admissibility::default()).unwrap()
        }
    }

    /// Identity transfers with the tree indices as basis: the MCBH representation is exact.
    fn exact_parts(problem: &Problem<f64, TestKernel>) -> H2MatrixParts<f64> {
        let side_parts = |side: Side| {
            let tree = problem.tree(side);
            let transfer = (0..tree.nnodes())
                .map(|node| Transfer::Identity(tree.index(node).len()))
                .collect::<Vec<_>>();
            let basis = (0..tree.nnodes())
                .map(|node| tree.index(node).to_vec())
                .collect::<Vec<_>>();
            (transfer, basis)
        };
        let (row_transfer, row_basis) = side_parts(Side::Row);
        let (col_transfer, col_basis) = side_parts(Side::Col);
        let symmetric = problem.is_symmetric();
        H2MatrixParts {
            row_transfer,
            col_transfer: (!symmetric).then_some(col_transfer),
            row_basis: Some(row_basis),
            col_basis: (!symmetric).then_some(col_basis),
            ..Default::default()
        }
    }

    fn dense_product(problem: &Problem<f64, TestKernel>, x: &[f64], transpose: bool) -> Vec<f64> {
        let [m, n] = problem.shape();
        let rows = (0..m).collect::<Vec<_>>();
        let cols = (0..n).collect::<Vec<_>>();
        let dense = problem.block(&rows, &cols);
        let data = dense.data();
        if transpose {
            (0..n).map(|j| (0..m).map(|i| data[i + j * m] * x[i]).sum()).collect()
        } else {
            (0..m).map(|i| (0..n).map(|j| data[i + j * m] * x[j]).sum()).collect()
        }
    }

    #[test]
    fn test_exact_representation() {
        for symmetric in [true, false] {
            let problem = problem(48, symmetric);
            let h2 = H2Matrix::from_parts(&problem, exact_parts(&problem)).unwrap();
            assert_eq!(h2.h2_type(), H2Type::Mcbh);
            assert_eq!(h2.mem_type(), MemType::Low);

            let x = (0..48).map(|i| (i as f64 * 0.7).sin()).collect::<Vec<_>>();
            for (a, b) in h2.dot(&x).unwrap().iter().zip(dense_product(&problem, &x, false)) {
                assert_relative_eq!(*a, b, epsilon = 1e-12);
            }
            for (a, b) in h2.rdot(&x).unwrap().iter().zip(dense_product(&problem, &x, true)) {
                assert_relative_eq!(*a, b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_dot_is_far_plus_close() {
        let problem = problem(48, false);
        let h2 = H2Matrix::from_parts(&problem, exact_parts(&problem)).unwrap();
        let x = (0..48).map(|i| 1.0 / (1.0 + i as f64)).collect::<Vec<_>>();
        let far = h2.far_dot(&x).unwrap();
        let close = h2.close_dot(&x).unwrap();
        for ((y, f), c) in h2.dot(&x).unwrap().iter().zip(&far).zip(&close) {
            assert_eq!(*y, f + c);
        }
        let far = h2.far_rdot(&x).unwrap();
        let close = h2.close_rdot(&x).unwrap();
        for ((y, f), c) in h2.rdot(&x).unwrap().iter().zip(&far).zip(&close) {
            assert_eq!(*y, f + c);
        }
    }

    #[test]
    fn test_block_product() {
        let problem = problem(32, true);
        let h2 = H2Matrix::from_parts(&problem, exact_parts(&problem)).unwrap();
        let dense = h2.to_dense().unwrap();
        assert_eq!(dense.shape(), [32, 32]);
        let rows = (0..32).collect::<Vec<_>>();
        let reference = problem.block(&rows, &rows);
        for (a, b) in dense.data().iter().zip(reference.data()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let problem = problem(32, true);
        let h2 = H2Matrix::from_parts(&problem, exact_parts(&problem)).unwrap();
        assert!(matches!(
            h2.dot(&[1.0; 31]),
            Err(H2Error::DimensionMismatch {
                expected: 32,
                actual: 31
            })
        ));
        assert!(matches!(
            h2.rdot_block(&crate::linalg::zeros([33, 2])),
            Err(H2Error::DimensionMismatch { .. })
        ));
    }
}
