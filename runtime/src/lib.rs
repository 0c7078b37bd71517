//! Kernel façade over the fusor compiler core.
//!
//! The external graph fuser hands a fused elementwise subgraph to
//! [`TensorExprKernel`] through the [`FusedGraph`] adapter; the kernel builds
//! tensors per operator, schedules and lowers them, selects a backend from
//! the device configuration and exposes a `run(inputs, outputs)` entry.

pub mod error;
pub mod graph;
pub mod kernel;
pub mod tunables;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use fusor_codegen::CallArg;
pub use graph::{Device, FusedGraph, GraphNode, OpKind, ValueDesc, ValueId};
pub use kernel::TensorExprKernel;
pub use tunables::{Tunables, tunables};
