//! Kernel evaluation
use crate::linalg::zeros;
use crate::types::{RealScalar, RlstArray};
use rlst::RawAccessMut;

/// Exact entries of the operator that is being compressed.
///
/// Implementations must be deterministic and accept arbitrary, possibly repeated and
/// non-contiguous, index subsets. Blocks may be evaluated from several threads at once.
pub trait Kernel: Sync {
    /// Scalar type
    type T: RealScalar;

    /// Number of rows and columns of the full operator.
    fn shape(&self) -> [usize; 2];

    /// Evaluate the submatrix with the given rows and columns.
    ///
    /// `result` has length `rows.len() * cols.len()` and is filled in column-major order.
    fn assemble_block(&self, rows: &[usize], cols: &[usize], result: &mut [Self::T]);

    /// Evaluate the submatrix with the given rows and columns into a new array.
    fn block(&self, rows: &[usize], cols: &[usize]) -> RlstArray<Self::T, 2> {
        let mut mat = zeros([rows.len(), cols.len()]);
        if !rows.is_empty() && !cols.is_empty() {
            self.assemble_block(rows, cols, mat.data_mut());
        }
        mat
    }
}
