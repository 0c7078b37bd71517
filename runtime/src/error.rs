use snafu::Snafu;

use crate::graph::Device;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: fusor_ir::Error },

    #[snafu(context(false), display("{source}"))]
    Schedule { source: fusor_schedule::Error },

    #[snafu(context(false), display("{source}"))]
    Codegen { source: fusor_codegen::Error },

    /// Graph op kind outside the registered set.
    #[snafu(display("unsupported graph op {kind}"))]
    UnsupportedOp { kind: String },

    /// Wrong number of inputs for a graph op.
    #[snafu(display("op {kind} expects {expected} inputs, got {actual}"))]
    OpArity { kind: String, expected: usize, actual: usize },

    /// Elementwise inputs must agree with the output shape (after
    /// broadcasting size-1 axes).
    #[snafu(display("op {kind}: input shape {input:?} does not broadcast to output shape {output:?}"))]
    ShapeMismatch { kind: String, input: Vec<i64>, output: Vec<i64> },

    /// A graph value referenced before definition, or a constant where a
    /// tensor is required.
    #[snafu(display("op {kind} requires a tensor input"))]
    TensorRequired { kind: String },

    /// Scalar attributes (cat/chunk dims, alpha) must be constants.
    #[snafu(display("op {kind} requires a constant {what}"))]
    ConstantRequired { kind: String, what: &'static str },

    /// All tensor values of one subgraph live on one device.
    #[snafu(display("graph mixes devices {first:?} and {second:?}"))]
    MixedDevices { first: Device, second: Device },

    /// A compiled kernel re-run under a different device configuration.
    #[snafu(display("backend mismatch: kernel compiled for {cached:?}, called for {requested:?}"))]
    BackendMismatch { cached: Device, requested: Device },

    /// The subgraph has no outputs.
    #[snafu(display("fused subgraph has no outputs"))]
    EmptyGraph,

    /// Chunk must divide the axis evenly.
    #[snafu(display("chunk: axis of extent {extent} is not divisible into {chunks} chunks"))]
    UnevenChunk { extent: i64, chunks: usize },
}
