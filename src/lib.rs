//! H2-matrices
//!
//! Hierarchical low-parametric representation of dense matrices arising from non-local
//! operators, built from kernel evaluations with the multicharge Barnes-Hut (MCBH) method.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod builder;
pub mod h2matrix;
pub mod kernel;
pub mod linalg;
pub mod operator;
pub mod pivot;
pub mod problem;
pub mod traits;
pub mod tree;
pub mod types;

pub use builder::{mcbh, BuildStats, McbhBuilder, McbhOptions};
pub use h2matrix::{H2Matrix, H2MatrixParts, MemoryParts, Transfer};
pub use kernel::PointKernel;
pub use operator::{diffnorm, ExactOperator};
pub use pivot::RrluSelector;
pub use problem::{Admissibility, Problem};
pub use traits::{Kernel, LinearOperator, PivotSelector};
pub use tree::ClusterTree;
pub use types::{H2Error, H2Result, H2Type, MemType, RealScalar, Side};

#[cfg(test)]
mod test {
    extern crate blas_src;
    extern crate lapack_src;
}
