//! Pivoted low-rank factorisations
use crate::linalg::transpose;
use crate::types::{RealScalar, RlstArray};

/// Rank-revealing selection of representative rows or columns.
pub trait PivotSelector<T: RealScalar> {
    /// Select rows of `mat` with relative tolerance `tau`.
    ///
    /// Returns `(rows, transfer)` such that `mat ≈ transfer * mat[rows, :]`, where `transfer` has
    /// one column per selected row.
    fn select_rows(&self, mat: &RlstArray<T, 2>, tau: T) -> (Vec<usize>, RlstArray<T, 2>);

    /// Select columns of `mat` with relative tolerance `tau`.
    ///
    /// Returns `(cols, transfer)` such that `mat ≈ mat[:, cols] * transfer`, where `transfer` has
    /// one row per selected column.
    fn select_cols(&self, mat: &RlstArray<T, 2>, tau: T) -> (Vec<usize>, RlstArray<T, 2>) {
        let (cols, transfer) = self.select_rows(&transpose(mat), tau);
        (cols, transpose(&transfer))
    }
}
