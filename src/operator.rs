//! Reference operators and error estimation
use crate::h2matrix::H2Matrix;
use crate::linalg::{from_column_major, gemm_acc, gemm_tn_acc, scatter_add_rows, select_rows, zeros};
use crate::problem::Problem;
use crate::traits::{Kernel, LinearOperator};
use crate::types::{H2Error, H2Result, RealScalar, Side};
use rlst::RawAccess;

/// The exact operator of a [Problem], applied block by block from kernel evaluations.
///
/// The far-field products only include the admissible blocks of the problem's partition.
pub struct ExactOperator<'a, T: RealScalar, K: Kernel<T = T>> {
    problem: &'a Problem<T, K>,
}

impl<'a, T: RealScalar, K: Kernel<T = T>> ExactOperator<'a, T, K> {
    /// Create the operator of a problem.
    pub fn new(problem: &'a Problem<T, K>) -> Self {
        Self { problem }
    }

    fn apply(&self, x: &[T], transpose: bool, far_only: bool) -> H2Result<Vec<T>> {
        let [m, n] = self.problem.shape();
        let (input, output) = if transpose { (m, n) } else { (n, m) };
        if x.len() != input {
            return Err(H2Error::DimensionMismatch {
                expected: input,
                actual: x.len(),
            });
        }
        let x = from_column_major([input, 1], x);
        let mut y = zeros([output, 1]);
        let row_tree = self.problem.tree(Side::Row);
        let col_tree = self.problem.tree(Side::Col);
        for i in 0..row_tree.nnodes() {
            let close: &[usize] = if far_only {
                &[]
            } else {
                self.problem.close(Side::Row, i)
            };
            for &j in self.problem.far(Side::Row, i).iter().chain(close) {
                let rows = row_tree.index(i);
                let cols = col_tree.index(j);
                let block = self.problem.block(rows, cols);
                if transpose {
                    let mut local = zeros([cols.len(), 1]);
                    gemm_tn_acc(&mut local, &block, &select_rows(&x, rows));
                    scatter_add_rows(&mut y, cols, &local);
                } else {
                    let mut local = zeros([rows.len(), 1]);
                    gemm_acc(&mut local, &block, &select_rows(&x, cols));
                    scatter_add_rows(&mut y, rows, &local);
                }
            }
        }
        Ok(y.data().to_vec())
    }
}

impl<T: RealScalar, K: Kernel<T = T>> LinearOperator<T> for ExactOperator<'_, T, K> {
    fn shape(&self) -> [usize; 2] {
        self.problem.shape()
    }

    fn dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.apply(x, false, false)
    }

    fn rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.apply(x, true, false)
    }

    fn far_dot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.apply(x, false, true)
    }

    fn far_rdot(&self, x: &[T]) -> H2Result<Vec<T>> {
        self.apply(x, true, true)
    }
}

#[cfg(feature = "diffnorm")]
mod power {
    use crate::types::{H2Result, RealScalar};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const MAX_ITERATIONS: usize = 200;

    fn norm<T: RealScalar>(v: &[T]) -> T {
        num::Float::sqrt(v.iter().fold(T::zero(), |acc, &x| acc + x * x))
    }

    /// Estimate the largest singular value of an operator with `n` columns by power iteration
    /// on `A^T A`.
    pub(super) fn largest_singular_value<T: RealScalar>(
        n: usize,
        dot: impl Fn(&[T]) -> H2Result<Vec<T>>,
        rdot: impl Fn(&[T]) -> H2Result<Vec<T>>,
    ) -> H2Result<T> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut v = (0..n)
            .map(|_| num::cast(rng.gen::<f64>() - 0.5).unwrap_or_else(T::zero))
            .collect::<Vec<T>>();
        let tol = num::Float::sqrt(<T as num::Float>::epsilon());
        let mut sigma = T::zero();
        for iteration in 0..MAX_ITERATIONS {
            let length = norm(&v);
            if length == T::zero() {
                return Ok(T::zero());
            }
            for value in v.iter_mut() {
                *value = *value / length;
            }
            let w = dot(&v)?;
            let estimate = norm(&w);
            if num::Float::abs(estimate - sigma) <= tol * estimate {
                log::debug!("Power iteration converged after {} steps", iteration + 1);
                return Ok(estimate);
            }
            sigma = estimate;
            v = rdot(&w)?;
        }
        log::warn!("Power iteration did not converge in {MAX_ITERATIONS} steps");
        Ok(sigma)
    }
}

/// Estimate `|A - B|_2 / |B|_2` without forming either operator.
///
/// With `far_only` set both operators are restricted to their far-field parts.
pub fn diffnorm<T: RealScalar>(
    a: &dyn LinearOperator<T>,
    b: &dyn LinearOperator<T>,
    far_only: bool,
) -> H2Result<T> {
    for (expected, actual) in b.shape().into_iter().zip(a.shape()) {
        if expected != actual {
            return Err(H2Error::DimensionMismatch { expected, actual });
        }
    }
    #[cfg(feature = "diffnorm")]
    {
        let dot = |op: &dyn LinearOperator<T>, x: &[T]| {
            if far_only {
                op.far_dot(x)
            } else {
                op.dot(x)
            }
        };
        let rdot = |op: &dyn LinearOperator<T>, x: &[T]| {
            if far_only {
                op.far_rdot(x)
            } else {
                op.rdot(x)
            }
        };
        let difference = |first: H2Result<Vec<T>>, second: H2Result<Vec<T>>| -> H2Result<Vec<T>> {
            let mut first = first?;
            for (p, q) in first.iter_mut().zip(second?) {
                *p -= q;
            }
            Ok(first)
        };
        let n = b.shape()[1];
        let numerator = power::largest_singular_value(
            n,
            |x| difference(dot(a, x), dot(b, x)),
            |x| difference(rdot(a, x), rdot(b, x)),
        )?;
        let denominator = power::largest_singular_value(n, |x| dot(b, x), |x| rdot(b, x))?;
        Ok(if denominator == T::zero() {
            numerator
        } else {
            numerator / denominator
        })
    }
    #[cfg(not(feature = "diffnorm"))]
    {
        let _ = far_only;
        Err(H2Error::FeatureUnavailable("diffnorm"))
    }
}

impl<T: RealScalar, K: Kernel<T = T>> H2Matrix<'_, T, K> {
    /// Estimate the relative spectral-norm distance to another operator, or to the exact
    /// operator of the problem if `other` is `None`.
    pub fn diffnorm(&self, other: Option<&dyn LinearOperator<T>>, far_only: bool) -> H2Result<T> {
        match other {
            Some(other) => diffnorm(self, other, far_only),
            None => diffnorm(self, &ExactOperator::new(self.problem()), far_only),
        }
    }
}
