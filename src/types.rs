//! Types specific to h2matrix

use rlst::{DynamicArray, Gemm, LinAlg, RlstScalar};

/// Real scalar types supported by the dense linear algebra backend.
pub trait RealScalar: num::Float + LinAlg + Gemm + RlstScalar<Real = Self> + Send + Sync {}

impl<T: num::Float + LinAlg + Gemm + RlstScalar<Real = T> + Send + Sync> RealScalar for T {}

/// Dynamically sized, column-major rlst array.
pub type RlstArray<T, const NDIM: usize> = DynamicArray<T, NDIM>;

/// Per-node list of dense blocks, indexed by node and position in the node's far or close list.
pub type BlockList<T> = Vec<Vec<RlstArray<T, 2>>>;

/// Side of a dual (row, column) cluster tree structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The row (target) tree
    Row,
    /// The column (source) tree
    Col,
}

impl Side {
    /// The other side of the dual structure.
    pub fn dual(self) -> Self {
        match self {
            Side::Row => Side::Col,
            Side::Col => Side::Row,
        }
    }
}

/// Representation type of an H2-matrix.
///
/// - `H2`: interaction blocks are arbitrary low-rank matrices.
/// - `Mcbh`: interaction blocks are submatrices of the kernel at per-node basis indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H2Type {
    /// General nested-basis representation
    H2,
    /// Representation backed by explicit row and column pivots
    Mcbh,
}

/// Memory model of an H2-matrix.
///
/// - `Full`: interaction and close blocks are stored.
/// - `Low`: interaction and close blocks are evaluated from the kernel when needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    /// Blocks are stored
    Full,
    /// Blocks are recomputed on demand
    Low,
}

/// Error type
#[derive(thiserror::Error, Debug)]
pub enum H2Error {
    /// Malformed or inconsistent input to a constructor
    #[error("Construction error: {0}")]
    Construction(String),
    /// Operand of a product has the wrong number of rows
    #[error("Dimension mismatch: expected {expected} rows, got {actual}")]
    DimensionMismatch {
        /// Expected number of rows
        expected: usize,
        /// Supplied number of rows
        actual: usize,
    },
    /// An optional capability was not compiled in
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(&'static str),
    /// Failure reported by the dense linear algebra backend
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),
    /// Malformed cluster tree
    #[error("Tree error: {0}")]
    Tree(String),
}

/// Result Type
pub type H2Result<T> = std::result::Result<T, H2Error>;
