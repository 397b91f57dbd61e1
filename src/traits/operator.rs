//! Linear operators
use crate::types::{H2Result, RealScalar};

/// An operator that can be applied from the left and from the right.
///
/// Both products take and return plain vectors. The far-field products restrict the operator
/// to its admissible blocks.
pub trait LinearOperator<T: RealScalar> {
    /// Number of rows and columns.
    fn shape(&self) -> [usize; 2];

    /// Compute `A x`.
    fn dot(&self, x: &[T]) -> H2Result<Vec<T>>;

    /// Compute `x^T A`, returned as a vector.
    fn rdot(&self, x: &[T]) -> H2Result<Vec<T>>;

    /// Compute the far-field part of `A x`.
    fn far_dot(&self, x: &[T]) -> H2Result<Vec<T>>;

    /// Compute the far-field part of `x^T A`.
    fn far_rdot(&self, x: &[T]) -> H2Result<Vec<T>>;
}
