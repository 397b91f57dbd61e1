//! Trait definitions

mod kernel;
mod operator;
mod pivot;

pub use kernel::Kernel;
pub use operator::LinearOperator;
pub use pivot::PivotSelector;
