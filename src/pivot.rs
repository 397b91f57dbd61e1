//! Rank-revealing LU pivot selection
use crate::linalg::zeros;
use crate::traits::PivotSelector;
use crate::types::{RealScalar, RlstArray};
use rlst::{RawAccess, RawAccessMut, Shape};

/// Row selection by rank-revealing LU decomposition with full pivoting.
///
/// Elimination stops at the first pivot with `|pivot| <= tau * |first pivot|`. The selected rows
/// are the pivot rows, and the transfer matrix is the interpolation `L * L11^{-1}`: it equals the
/// identity on the selected rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RrluSelector {
    /// Upper bound on the number of selected rows
    pub max_rank: Option<usize>,
}

impl RrluSelector {
    /// Create a selector with no rank limit.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: RealScalar> PivotSelector<T> for RrluSelector {
    fn select_rows(&self, mat: &RlstArray<T, 2>, tau: T) -> (Vec<usize>, RlstArray<T, 2>) {
        let [m, n] = mat.shape();
        let max_rank = self.max_rank.unwrap_or(usize::MAX).min(m).min(n);

        let mut lu = mat.data().to_vec();
        let mut rows = (0..m).collect::<Vec<_>>();
        let mut first = T::zero();
        let mut rank = 0;

        while rank < max_rank {
            let k = rank;
            let (mut pi, mut pj, mut pivot) = (k, k, T::zero());
            for j in k..n {
                for i in k..m {
                    let value = num::Float::abs(lu[i + j * m]);
                    if value > pivot {
                        (pi, pj, pivot) = (i, j, value);
                    }
                }
            }
            if k == 0 {
                first = pivot;
            }
            if pivot == T::zero() || pivot <= tau * first {
                break;
            }

            if pi != k {
                rows.swap(pi, k);
                for j in 0..n {
                    lu.swap(pi + j * m, k + j * m);
                }
            }
            if pj != k {
                for i in 0..m {
                    lu.swap(i + pj * m, i + k * m);
                }
            }

            let diagonal = lu[k + k * m];
            for i in k + 1..m {
                lu[i + k * m] = lu[i + k * m] / diagonal;
            }
            for j in k + 1..n {
                let ukj = lu[k + j * m];
                for i in k + 1..m {
                    let lik = lu[i + k * m];
                    lu[i + j * m] -= lik * ukj;
                }
            }
            rank += 1;
        }

        // Solve y * L11 = l for every row l of L21, L11 being unit lower triangular.
        let mut transfer = zeros([m, rank]);
        let data = transfer.data_mut();
        for (position, &row) in rows.iter().enumerate() {
            if position < rank {
                data[row + position * m] = T::one();
                continue;
            }
            let mut y = (0..rank).map(|j| lu[position + j * m]).collect::<Vec<_>>();
            for j in (0..rank).rev() {
                let mut value = y[j];
                for t in j + 1..rank {
                    value -= y[t] * lu[t + j * m];
                }
                y[j] = value;
            }
            for (j, value) in y.into_iter().enumerate() {
                data[row + j * m] = value;
            }
        }

        rows.truncate(rank);
        log::trace!("Selected {} of {} rows", rank, m);
        (rows, transfer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linalg::{entry, from_column_major, matmul, select_cols, select_rows};
    use approx::assert_relative_eq;

    fn low_rank(m: usize, n: usize) -> RlstArray<f64, 2> {
        let mut data = vec![0.0; m * n];
        for j in 0..n {
            for i in 0..m {
                let (x, y) = (i as f64, j as f64);
                data[i + j * m] = 1.0 + x * y + (x - 1.0) * (y + 2.0) * 0.5;
            }
        }
        from_column_major([m, n], &data)
    }

    #[test]
    fn test_select_rows_reproduces_low_rank() {
        let a = low_rank(7, 5);
        let (rows, transfer) = RrluSelector::new().select_rows(&a, 1e-12);
        assert_eq!(rows.len(), 2);
        assert_eq!(transfer.shape(), [7, 2]);
        let approx = matmul(&transfer, &select_rows(&a, &rows));
        for (x, y) in approx.data().iter().zip(a.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-10);
        }
        for (position, &row) in rows.iter().enumerate() {
            for j in 0..rows.len() {
                let expected = if j == position { 1.0 } else { 0.0 };
                assert_eq!(entry(&transfer, row, j), expected);
            }
        }
    }

    #[test]
    fn test_select_cols_reproduces_low_rank() {
        let a = low_rank(4, 9);
        let (cols, transfer) = RrluSelector::new().select_cols(&a, 1e-12);
        assert_eq!(cols.len(), 2);
        assert_eq!(transfer.shape(), [2, 9]);
        let approx = matmul(&select_cols(&a, &cols), &transfer);
        for (x, y) in approx.data().iter().zip(a.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_full_rank_and_zero() {
        let a = from_column_major([3, 3], &[2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0]);
        let (rows, _) = RrluSelector::new().select_rows(&a, 1e-12);
        assert_eq!(rows, vec![1, 0, 2]);

        let zero = zeros::<f64>([4, 3]);
        let (rows, transfer) = RrluSelector::new().select_rows(&zero, 1e-12);
        assert!(rows.is_empty());
        assert_eq!(transfer.shape(), [4, 0]);

        let (rows, _) = RrluSelector { max_rank: Some(1) }.select_rows(&a, 0.0);
        assert_eq!(rows, vec![1]);
    }
}
