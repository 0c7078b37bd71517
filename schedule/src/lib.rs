//! Tensor builders, loop-level scheduling and lowering.
//!
//! [`compute`] builds tensors from index-to-expression closures; a
//! [`Schedule`] over the output tensors exposes the loop transformations
//! (split with tail, split with mask, compute-inline, GPU axis binding) and
//! lowers the result to a single statement for the codegen backends.

pub mod error;
pub mod lower;
pub mod schedule;
pub mod tensor;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use schedule::{LoopAxis, OpId, Schedule, SplitWithMask, SplitWithTail, TensorExprNode};
pub use tensor::{DimArg, Tensor, compute, dim_args};
