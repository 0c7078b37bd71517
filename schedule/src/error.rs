use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Malformed IR produced or encountered while rewriting.
    #[snafu(context(false), display("{source}"))]
    Ir { source: fusor_ir::Error },

    /// The tensor is not registered in this schedule.
    #[snafu(display("tensor {name} is not part of this schedule"))]
    UnknownTensor { name: String },

    /// The named loop axis does not exist (anymore) on the operation.
    #[snafu(display("no loop axis for variable {name} on operation {op}"))]
    AxisNotFound { op: String, name: String },

    /// Splits need a statically known extent.
    #[snafu(display("loop extent of axis {name} on {op} is not a constant"))]
    NonConstantExtent { op: String, name: String },

    /// Split factors are positive.
    #[snafu(display("invalid split factor {factor}"))]
    BadFactor { factor: i32 },

    /// Output tensors cannot be computed inline.
    #[snafu(display("output tensor {name} cannot be inlined"))]
    InlineOutput { name: String },

    /// Transforms no longer apply once a tensor is inlined.
    #[snafu(display("tensor {name} is computed inline and has no loop nest"))]
    InlinedTensor { name: String },

    /// One GPU axis index per realized kernel.
    #[snafu(display("gpu axis index {index} is already bound on operation {op}"))]
    GpuAxisIndexReused { op: String, index: u8 },

    /// Lowering an empty schedule is meaningless.
    #[snafu(display("schedule has no output tensors"))]
    EmptySchedule,
}
