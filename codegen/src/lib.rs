//! Codegen backends for lowered statements.
//!
//! Three interchangeable sinks behind one [`CodeGen`] trait: the tree-walking
//! interpreter ([`SimpleIrEval`]), the LLVM JIT (`LlvmCodeGen`, behind the
//! `llvm` feature) and the CUDA source emitter ([`CudaCodeGen`]). They share
//! the parameter/argument marshaling layer and no other state.

pub mod cuda;
pub mod error;
pub mod interp;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod types;

#[cfg(test)]
mod test;

pub use cuda::CudaCodeGen;
pub use error::{Error, Result};
pub use interp::{SimpleIrEval, Value, evaluate_expr, evaluate_expr_with};
#[cfg(feature = "llvm")]
pub use llvm::LlvmCodeGen;
pub use types::{BufferArg, CallArg, CodeGen};
