use fusor_dtype::Dtype;
use snafu::Snafu;

use crate::expr::{BinaryOp, IntrinsicOp};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structural and type-rule violations raised while building or rewriting IR.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// No common dtype for a binary operation.
    #[snafu(display("type promotion failed: no common dtype for {lhs} and {rhs}"))]
    PromotionFailed { lhs: Dtype, rhs: Dtype },

    /// Cast must preserve the lane count.
    #[snafu(display("cast lane mismatch: cannot cast {from} to {to}"))]
    CastLaneMismatch { from: Dtype, to: Dtype },

    /// Handle values never participate in casts.
    #[snafu(display("invalid cast involving handle dtype: {from} to {to}"))]
    CastHandle { from: Dtype, to: Dtype },

    /// Bitwise and shift operations require int32 operands.
    #[snafu(display("bitwise operation {op:?} requires int32 operands, got {lhs} and {rhs}"))]
    BitwiseOperandNotInt { op: BinaryOp, lhs: Dtype, rhs: Dtype },

    /// CompareSelect branch values must share one dtype.
    #[snafu(display("branch dtype mismatch: {true_value} vs {false_value}"))]
    BranchDtypeMismatch { true_value: Dtype, false_value: Dtype },

    /// Conditions are scalar int32.
    #[snafu(display("condition must be a scalar int32 expression, got {dtype}"))]
    ConditionNotScalarInt { dtype: Dtype },

    /// Ramp base and stride must be equal-dtype scalars.
    #[snafu(display("ramp operands must be equal-dtype scalars, got base {base} and stride {stride}"))]
    RampOperandMismatch { base: Dtype, stride: Dtype },

    /// Broadcast lifts a scalar; vectors cannot be re-broadcast.
    #[snafu(display("broadcast requires a scalar value, got {dtype}"))]
    BroadcastRequiresScalar { dtype: Dtype },

    /// Lane counts start at one.
    #[snafu(display("invalid lane count {lanes}"))]
    InvalidLaneCount { lanes: u32 },

    /// A buffer base must be a variable of Handle dtype.
    #[snafu(display("{context} requires a handle variable, got {dtype}"))]
    HandleRequired { context: &'static str, dtype: Dtype },

    /// A position that only accepts a variable received something else.
    #[snafu(display("{context} requires a variable expression"))]
    VariableRequired { context: &'static str },

    /// Load/Store indices are int32.
    #[snafu(display("{context} index must have int32 scalar kind, got {dtype}"))]
    IndexNotInt { context: &'static str, dtype: Dtype },

    /// Load/Store masks are int32.
    #[snafu(display("{context} mask must have int32 scalar kind, got {dtype}"))]
    MaskNotInt { context: &'static str, dtype: Dtype },

    /// Load/Store lane agreement: value, index and mask share one lane count.
    #[snafu(display("{context} lane mismatch: value {value}, index {index}, mask {mask}"))]
    AccessLaneMismatch { context: &'static str, value: Dtype, index: Dtype, mask: Dtype },

    /// Wrong number of arguments for an intrinsic.
    #[snafu(display("intrinsic {op:?} expects {expected} arguments, got {actual}"))]
    IntrinsicArity { op: IntrinsicOp, expected: usize, actual: usize },

    /// Math intrinsics operate on floats.
    #[snafu(display("intrinsic {op:?} requires float operands, got {dtype}"))]
    IntrinsicOperandNotFloat { op: IntrinsicOp, dtype: Dtype },

    /// Wrong number of indices in a tensor function call.
    #[snafu(display("call to {name} expects {expected} indices, got {actual}"))]
    CallArity { name: String, expected: usize, actual: usize },

    /// Call indices are scalar int32.
    #[snafu(display("call to {name} requires scalar int32 indices, got {dtype}"))]
    CallIndexNotScalarInt { name: String, dtype: Dtype },

    /// Wrong number of indices for a buffer's rank.
    #[snafu(display("buffer {name} has rank {expected}, got {actual} indices"))]
    BufferRank { name: String, expected: usize, actual: usize },

    /// Function dims and iteration args must pair up.
    #[snafu(display("function {name} has {dims} dims but {args} iteration args"))]
    FunctionDimsArgsMismatch { name: String, dims: usize, args: usize },

    /// Let binds a variable of the value's dtype.
    #[snafu(display("let binding dtype mismatch: variable {var} vs value {value}"))]
    LetDtypeMismatch { var: Dtype, value: Dtype },

    /// Loop variables are scalar int32 variables.
    #[snafu(display("loop variable must be a scalar int32 variable, got {dtype}"))]
    LoopVarNotScalarInt { dtype: Dtype },

    /// Loop bounds are scalar int32.
    #[snafu(display("loop bound must be a scalar int32 expression, got {dtype}"))]
    LoopBoundNotScalarInt { dtype: Dtype },

    /// GPU axes are x, y, z, w.
    #[snafu(display("gpu axis index {index} out of range (0..=3)"))]
    GpuAxisOutOfRange { index: u8 },

    /// A loop already bound to a different GPU axis index.
    #[snafu(display("gpu axis already bound to index {existing}, cannot re-bind to {requested}"))]
    GpuAxisConflict { existing: u8, requested: u8 },

    /// A loop cannot be both a block and a thread axis.
    #[snafu(display("cannot bind both gpu block and thread index on one loop"))]
    GpuBlockThreadConflict,
}
