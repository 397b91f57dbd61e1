//! Kernels defined by a pointwise function of target and source coordinates
use crate::traits::Kernel;
use crate::types::{H2Error, H2Result, RealScalar};

/// Euclidean distance between two points.
fn distance<T: RealScalar>(x: &[T], y: &[T]) -> T {
    num::Float::sqrt(
        x.iter()
            .zip(y)
            .fold(T::zero(), |acc, (&a, &b)| acc + (a - b) * (a - b)),
    )
}

/// The regularised inverse distance `1 / (1 + |x - y|)`.
pub fn regularised_inverse_distance<T: RealScalar>(x: &[T], y: &[T]) -> T {
    T::one() / (T::one() + distance(x, y))
}

/// The inverse distance `1 / |x - y|`, set to zero for coincident points.
pub fn inverse_distance<T: RealScalar>(x: &[T], y: &[T]) -> T {
    let d = distance(x, y);
    if d == T::zero() {
        T::zero()
    } else {
        T::one() / d
    }
}

/// Kernel matrix `A[i, j] = f(targets[i], sources[j])`.
///
/// Points are stored contiguously: point `i` is `points[i * dim..(i + 1) * dim]`.
#[derive(Clone)]
pub struct PointKernel<T: RealScalar, F: Fn(&[T], &[T]) -> T> {
    targets: Vec<T>,
    sources: Vec<T>,
    dim: usize,
    func: F,
}

impl<T: RealScalar, F: Fn(&[T], &[T]) -> T> PointKernel<T, F> {
    /// Create a kernel from target and source coordinates.
    pub fn new(targets: &[T], sources: &[T], dim: usize, func: F) -> H2Result<Self> {
        if dim == 0 || targets.len() % dim != 0 || sources.len() % dim != 0 {
            return Err(H2Error::Construction(format!(
                "Point arrays of length {} and {} do not hold points of dimension {}",
                targets.len(),
                sources.len(),
                dim
            )));
        }
        Ok(Self {
            targets: targets.to_vec(),
            sources: sources.to_vec(),
            dim,
            func,
        })
    }

    /// Geometric dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Target coordinates.
    pub fn targets(&self) -> &[T] {
        &self.targets
    }

    /// Source coordinates.
    pub fn sources(&self) -> &[T] {
        &self.sources
    }
}

impl<T: RealScalar> PointKernel<T, fn(&[T], &[T]) -> T> {
    /// Kernel `1 / (1 + |x - y|)`.
    pub fn regularised_inverse_distance(targets: &[T], sources: &[T], dim: usize) -> H2Result<Self> {
        Self::new(targets, sources, dim, regularised_inverse_distance::<T>)
    }

    /// Kernel `1 / |x - y|` with zero diagonal.
    pub fn inverse_distance(targets: &[T], sources: &[T], dim: usize) -> H2Result<Self> {
        Self::new(targets, sources, dim, inverse_distance::<T>)
    }
}

impl<T: RealScalar, F: Fn(&[T], &[T]) -> T + Sync> Kernel for PointKernel<T, F> {
    type T = T;

    fn shape(&self) -> [usize; 2] {
        [self.targets.len() / self.dim, self.sources.len() / self.dim]
    }

    fn assemble_block(&self, rows: &[usize], cols: &[usize], result: &mut [T]) {
        debug_assert_eq!(result.len(), rows.len() * cols.len());
        let dim = self.dim;
        for (column, &j) in result.chunks_mut(rows.len().max(1)).zip(cols) {
            let source = &self.sources[j * dim..(j + 1) * dim];
            for (value, &i) in column.iter_mut().zip(rows) {
                *value = (self.func)(&self.targets[i * dim..(i + 1) * dim], source);
            }
        }
    }
}
